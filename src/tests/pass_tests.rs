use super::*;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{tempdir, TempDir};

#[derive(Default)]
struct RecordingRestart {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl RestartSignal for RecordingRestart {
    async fn restart(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("service not found");
        }
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    paths: GuardPaths,
}

impl Fixture {
    fn new(clients: Value, log_lines: &[String]) -> Self {
        let dir = tempdir().unwrap();
        let paths = GuardPaths {
            config: dir.path().join("config.json"),
            access_log: dir.path().join("access.log"),
            cache_dir: dir.path().join("cache"),
            restart_command: "true".to_string(),
        };
        let config = json!({
            "log": { "loglevel": "warning" },
            "inbounds": [ { "tag": "vless-in", "protocol": "vless", "settings": { "clients": clients } } ]
        });
        std::fs::write(&paths.config, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        std::fs::write(&paths.access_log, log_lines.concat()).unwrap();
        Self { dir, paths }
    }

    fn config_text(&self) -> String {
        std::fs::read_to_string(&self.paths.config).unwrap()
    }

    fn backups(&self) -> usize {
        count_backups(self.dir.path())
    }
}

fn count_backups(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".bak")
        })
        .count()
}

fn log_line(now: DateTime<Utc>, ip: &str, user: &str) -> String {
    let at = (now - chrono::Duration::minutes(1)).with_timezone(&chrono::Local);
    format!(
        "{} tcp:{}:51000 accepted tcp:example.com:443 [vless-in >> direct] email: {}\n",
        at.format("%Y/%m/%d %H:%M:%S%.6f"),
        ip,
        user
    )
}

fn abusive_log(now: DateTime<Utc>) -> Vec<String> {
    ["1.2.3.4", "5.6.7.8", "9.9.9.9", "1.1.1.1"]
        .iter()
        .map(|ip| log_line(now, ip, "alice"))
        .collect()
}

fn options(dry_run: bool) -> PassOptions {
    PassOptions {
        dry_run,
        policy: PolicyOptions::default(),
    }
}

#[tokio::test]
async fn test_dry_run_leaves_config_untouched() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    let before = fixture.config_text();
    let restart = Arc::new(RecordingRestart::default());

    let pass = PolicyPass::new(fixture.paths.clone(), options(true), restart.clone());
    let report = pass.run(now).await.unwrap();

    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.flagged, 1);
    assert!(!report.written);
    assert_eq!(fixture.config_text(), before);
    assert_eq!(fixture.backups(), 0);
    assert_eq!(restart.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_applied_change_writes_backup_and_restarts() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }, { "email": "bob" }]), &abusive_log(now));
    let restart = Arc::new(RecordingRestart::default());

    let pass = PolicyPass::new(fixture.paths.clone(), options(false), restart.clone());
    let report = pass.run(now).await.unwrap();

    assert!(report.written);
    assert!(report.restarted);
    assert!(report.backup.as_ref().unwrap().exists());
    assert_eq!(fixture.backups(), 1);
    assert_eq!(restart.calls.load(Ordering::SeqCst), 1);

    let written: Value = serde_json::from_str(&fixture.config_text()).unwrap();
    let alice = &written["inbounds"][0]["settings"]["clients"][0];
    assert_eq!(
        alice["deActiveReason"],
        json!("Used by 4 ips in 10 mins ago (1.2.3.4, 5.6.7.8, 9.9.9.9, 1.1.1.1)")
    );
    assert_eq!(written["log"], json!({ "loglevel": "warning" }));
    assert!(written["inbounds"][0]["settings"]["clients"][1]
        .get("deActiveDate")
        .is_none());
}

#[tokio::test]
async fn test_no_transitions_means_no_write() {
    let now = Utc::now();
    let fixture = Fixture::new(
        json!([{ "email": "alice" }]),
        &[log_line(now, "1.2.3.4", "alice")],
    );
    let before = fixture.config_text();
    let restart = Arc::new(RecordingRestart::default());

    let pass = PolicyPass::new(fixture.paths.clone(), options(false), restart.clone());
    let report = pass.run(now).await.unwrap();

    assert_eq!(report.events, 1);
    assert!(report.transitions.is_empty());
    assert_eq!(fixture.config_text(), before);
    assert_eq!(restart.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_failure_does_not_fail_pass() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    let restart = Arc::new(RecordingRestart {
        fail: true,
        ..RecordingRestart::default()
    });

    let pass = PolicyPass::new(fixture.paths.clone(), options(false), restart.clone());
    let report = pass.run(now).await.unwrap();

    assert!(report.written);
    assert!(!report.restarted);
    assert_eq!(restart.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_pass_reactivates_after_window_passes() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    let restart = Arc::new(RecordingRestart::default());
    let pass = PolicyPass::new(fixture.paths.clone(), options(false), restart.clone());

    pass.run(now).await.unwrap();
    let later = now + chrono::Duration::minutes(20);
    let report = pass.run(later).await.unwrap();

    assert_eq!(report.events, 0);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(
        report.transitions[0].kind,
        crate::policy::TransitionKind::Reactivated
    );
    assert_eq!(restart.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_without_email_does_not_block_others() {
    let now = Utc::now();
    let fixture = Fixture::new(
        json!([{ "email": "alice" }, { "id": "legacy-client", "level": 0 }]),
        &abusive_log(now),
    );
    let restart = Arc::new(RecordingRestart::default());
    let pass = PolicyPass::new(fixture.paths.clone(), options(false), restart.clone());

    let report = pass.run(now).await.unwrap();

    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].email, "alice");
    let written: Value = serde_json::from_str(&fixture.config_text()).unwrap();
    let clients = &written["inbounds"][0]["settings"]["clients"];
    assert!(clients[0]["deActiveReason"].is_string());
    assert_eq!(clients[1], json!({ "id": "legacy-client", "level": 0 }));
}

#[tokio::test]
async fn test_mutation_uses_config_reloaded_after_log_reads() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    let pass = PolicyPass::new(
        fixture.paths.clone(),
        options(false),
        Arc::new(RecordingRestart::default()),
    );

    let observation = pass.observe(now).await.unwrap();

    // An operator edit landing between the lookup and the mutation.
    let mut edited: Value = serde_json::from_str(&fixture.config_text()).unwrap();
    edited["inbounds"][0]["settings"]["clients"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "email": "carol", "id": "added-by-dashboard" }));
    edited["routing"] = json!({ "domainStrategy": "AsIs" });
    std::fs::write(&fixture.paths.config, edited.to_string()).unwrap();

    let report = pass.enforce(observation, now).await.unwrap();
    assert!(report.written);

    let written: Value = serde_json::from_str(&fixture.config_text()).unwrap();
    let clients = &written["inbounds"][0]["settings"]["clients"];
    assert!(clients[0]["deActiveReason"]
        .as_str()
        .unwrap()
        .starts_with("Used by 4 ips"));
    assert_eq!(clients[1]["email"], json!("carol"));
    assert_eq!(written["routing"], json!({ "domainStrategy": "AsIs" }));
}

#[tokio::test]
async fn test_dry_run_never_needs_the_restart_program() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    let restart =
        crate::restart::CommandRestart::from_command_line("no-such-restart-tool-on-this-host")
            .unwrap();
    let pass = PolicyPass::new(fixture.paths.clone(), options(true), Arc::new(restart));

    let report = pass.run(now).await.unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert!(!report.restarted);
}

#[tokio::test]
async fn test_unparsable_config_aborts_before_cursors_move() {
    let now = Utc::now();
    let fixture = Fixture::new(json!([{ "email": "alice" }]), &abusive_log(now));
    std::fs::write(&fixture.paths.config, "{ \"inbounds\": [").unwrap();
    let pass = PolicyPass::new(
        fixture.paths.clone(),
        options(false),
        Arc::new(RecordingRestart::default()),
    );

    assert!(pass.run(now).await.is_err());
    let cursor = CacheStore::new(fixture.paths.cache_dir.clone())
        .path_for(crate::usage::USAGE_CURSOR_KEY);
    assert!(!cursor.exists());
}

#[test]
fn test_report_display() {
    let report = PassReport {
        events: 12,
        flagged: 1,
        written: true,
        ..PassReport::default()
    };
    assert_eq!(
        report.to_string(),
        "12 new events, 1 flagged, 0 transitions, config written"
    );
}
