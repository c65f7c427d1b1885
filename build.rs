use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs", "md", "toml"];

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "examples"];

const EXCLUDED_FILES: &[&str] = &["Cargo.lock"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    let sha = git_output(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=XRAY_GUARD_GIT_SHA={}", sha);

    let root = manifest_root();
    let files = collect_files_to_check(&root);
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    enforce_line_limits(&root, &files);

    let rust_files: Vec<PathBuf> = files
        .into_iter()
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("rs")
                && p.file_name().and_then(|n| n.to_str()) != Some("build.rs")
        })
        .collect();
    enforce_no_dead_code_allows(&root, &rust_files);
    enforce_no_test_skips(&root, &rust_files);
    enforce_serial_for_env_mutations(&root, &rust_files);
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn manifest_root() -> PathBuf {
    PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()))
}

fn collect_files_to_check(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk_directory(root, root, &mut files);
    files.sort();
    files
}

fn walk_directory(dir: &Path, root: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            let excluded = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name));
            if !excluded {
                walk_directory(&path, root, files);
            }
        } else if should_check_file(&path, root) {
            files.push(path);
        }
    }
}

fn should_check_file(path: &Path, root: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !CHECKED_EXTENSIONS.contains(&ext) {
        return false;
    }
    match path.strip_prefix(root) {
        Ok(rel) => !EXCLUDED_FILES.contains(&rel.to_string_lossy().as_ref()),
        Err(_) => true,
    }
}

fn relative(root: &Path, file: &Path) -> PathBuf {
    file.strip_prefix(root).unwrap_or(file).to_path_buf()
}

fn report(title: &str, violations: &[(PathBuf, usize, String)], advice: &[&str]) {
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, msg) in violations {
        eprintln!("  {}:{}", path.display(), line);
        eprintln!("    {}", msg.trim());
    }
    eprintln!("========================================");
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!();
}

fn enforce_line_limits(root: &Path, files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        match std::fs::read_to_string(file) {
            Ok(content) => {
                let count = content.lines().filter(|l| !l.trim().is_empty()).count();
                if count > MAX_LINES {
                    violations.push((
                        relative(root, file),
                        count,
                        format!("{} lines (exceeds by {})", count, count - MAX_LINES),
                    ));
                }
            }
            Err(e) => println!(
                "cargo:warning=Could not read file {}: {}",
                relative(root, file).display(),
                e
            ),
        }
    }

    if !violations.is_empty() {
        report(
            &format!("FILE LINE LIMIT EXCEEDED (max {} lines)", MAX_LINES),
            &violations,
            &["Please split these files into smaller modules."],
        );
        panic!(
            "Build failed: {} file(s) exceed the {} line limit",
            violations.len(),
            MAX_LINES
        );
    }
}

fn enforce_no_dead_code_allows(root: &Path, files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
            {
                violations.push((relative(root, file), line_num + 1, line.to_string()));
            }
        }
    }

    if !violations.is_empty() {
        report(
            "#[allow(dead_code)] IS NOT ALLOWED",
            &violations,
            &[
                "Delete unused code instead of silencing the warning.",
                "Test-only helpers belong behind #[cfg(test)].",
            ],
        );
        panic!(
            "Build failed: {} #[allow(dead_code)] occurrence(s) found.",
            violations.len()
        );
    }
}

/// A test function located in a source file, with its body lines.
struct TestFn<'a> {
    start: usize,
    name: String,
    serial: bool,
    body: Vec<&'a str>,
}

fn test_functions(content: &str) -> Vec<TestFn<'_>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut found = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if trimmed != "#[test]" && !trimmed.starts_with("#[tokio::test") {
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut serial = false;
        let mut j = i + 1;
        while j < lines.len() && !lines[j].contains("fn ") {
            let attr = lines[j].trim();
            if attr == "#[serial]" || attr == "#[serial_test::serial]" {
                serial = true;
            }
            j += 1;
        }
        if j >= lines.len() {
            break;
        }

        let name = lines[j]
            .split("fn ")
            .nth(1)
            .and_then(|rest| rest.split('(').next())
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut depth = 0i32;
        let mut body = Vec::new();
        let mut k = j;
        while k < lines.len() {
            body.push(lines[k]);
            for c in lines[k].chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if depth == 0 && lines[k].contains('}') {
                break;
            }
            k += 1;
        }

        found.push(TestFn {
            start,
            name,
            serial,
            body,
        });
        i = k + 1;
    }
    found
}

/// Bans tests that silently skip instead of failing.
fn enforce_no_test_skips(root: &Path, files: &[PathBuf]) {
    let skip_patterns = ["Skipping test", "skipping test", "Test skipped", "test skipped"];

    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for test in test_functions(&content) {
            let mut depth = 0i32;
            for line in &test.body {
                if let Some(pattern) = skip_patterns.iter().find(|p| line.contains(*p)) {
                    violations.push((
                        relative(root, file),
                        test.start,
                        format!("test `{}` contains skip pattern: {}", test.name, pattern),
                    ));
                    break;
                }
                if line.trim() == "return;" && depth > 1 {
                    violations.push((
                        relative(root, file),
                        test.start,
                        format!("test `{}` has conditional early return", test.name),
                    ));
                    break;
                }
                for c in line.chars() {
                    match c {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        report(
            "SILENT TEST SKIPS ARE NOT ALLOWED",
            &violations,
            &["Tests must FAIL if they cannot run, not silently pass."],
        );
        panic!(
            "Build failed: {} silent test skip(s) found.",
            violations.len()
        );
    }
}

/// Requires #[serial] for tests that mutate environment variables.
fn enforce_serial_for_env_mutations(root: &Path, files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for test in test_functions(&content) {
            let mutates = test.body.iter().any(|line| {
                let trimmed = line.trim();
                !trimmed.starts_with("//")
                    && (trimmed.contains("env::set_var") || trimmed.contains("env::remove_var"))
            });
            if mutates && !test.serial {
                violations.push((
                    relative(root, file),
                    test.start,
                    format!("test `{}` mutates env without #[serial]", test.name),
                ));
            }
        }
    }

    if !violations.is_empty() {
        report(
            "ENV MUTATIONS REQUIRE #[serial]",
            &violations,
            &["Add #[serial] from the serial_test crate to these tests."],
        );
        panic!(
            "Build failed: {} test(s) mutate env vars without #[serial].",
            violations.len()
        );
    }
}
