//! Backup-then-write of the configuration document.
//!
//! The current file is copied to `<name>.<YYYYmmdd-HHMMSS>.bak` beside it, then
//! the new document is written to a temp file and renamed over the original.
//! The copy and the write are not one transaction; if the write fails the
//! backup is the recovery point. Keys keep the order they have on disk and new
//! keys are appended, so a write only shows up in a diff where values changed.

use super::schema::ConfigDocument;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Backups kept per configuration file; older ones are deleted.
pub const MAX_BACKUPS: usize = 10;

const BACKUP_EXTENSION: &str = ".bak";

/// Writes `document` to `path`, backing up the previous contents first.
/// Returns the backup path, or `None` if there was no previous file.
///
/// # Errors
///
/// Returns an error if the backup, serialization, or write fails. The
/// on-disk config is only replaced once the new content is fully written.
pub async fn write_config(
    path: &Path,
    document: &ConfigDocument,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    let previous = match tokio::fs::metadata(path).await {
        Ok(metadata) => Some(metadata),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat config file: {}", path.display()))
        }
    };

    let backup = match &previous {
        Some(_) => {
            let backup = backup_path(path, now);
            tokio::fs::copy(path, &backup).await.with_context(|| {
                format!("Failed to back up config file to: {}", backup.display())
            })?;
            Some(backup)
        }
        None => None,
    };

    let mut value = serde_json::to_value(document).context("Failed to serialize config document")?;
    if previous.is_some() {
        match on_disk_layout(path).await {
            Some(layout) => value = align_key_order(value, &layout),
            None => tracing::debug!(
                path = %path.display(),
                "Previous config unreadable, keeping default key order"
            ),
        }
    }
    let mut content =
        serde_json::to_string_pretty(&value).context("Failed to serialize config document")?;
    content.push('\n');

    let temp_path = temp_path(path);
    tokio::fs::write(&temp_path, &content)
        .await
        .with_context(|| format!("Failed to write temp config file: {}", temp_path.display()))?;
    if let Some(metadata) = previous {
        tokio::fs::set_permissions(&temp_path, metadata.permissions())
            .await
            .with_context(|| format!("Failed to copy permissions to: {}", temp_path.display()))?;
    }
    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    if let Err(e) = prune_backups(path, MAX_BACKUPS).await {
        tracing::warn!("Failed to prune old config backups: {:#}", e);
    }

    Ok(backup)
}

async fn on_disk_layout(path: &Path) -> Option<Value> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&content).ok()
}

/// Reorders object keys in `value` to match `layout`. Keys `layout` lacks keep
/// their relative order after the known ones. Arrays are matched by index.
fn align_key_order(value: Value, layout: &Value) -> Value {
    match (value, layout) {
        (Value::Object(map), Value::Object(reference)) => {
            let mut remaining: Vec<(String, Value)> = map.into_iter().collect();
            let mut aligned = Map::with_capacity(remaining.len());
            for (key, nested) in reference {
                if let Some(index) = remaining.iter().position(|(name, _)| name == key) {
                    let (name, entry) = remaining.remove(index);
                    aligned.insert(name, align_key_order(entry, nested));
                }
            }
            aligned.extend(remaining);
            Value::Object(aligned)
        }
        (Value::Array(items), Value::Array(reference)) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match reference.get(index) {
                    Some(nested) => align_key_order(item, nested),
                    None => item,
                })
                .collect(),
        ),
        (value, _) => value,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string())
}

pub fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    path.with_file_name(format!(
        "{}.{}{}",
        file_name(path),
        now.format("%Y%m%d-%H%M%S"),
        BACKUP_EXTENSION
    ))
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_file_name(format!("{}.tmp", file_name(path)))
}

/// Deletes all but the newest `keep` backups of `path`.
async fn prune_backups(path: &Path, keep: usize) -> Result<usize> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}.", file_name(path));

    let mut backups = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(BACKUP_EXTENSION) {
            backups.push(entry.path());
        }
    }

    // Timestamps in the names sort chronologically.
    backups.sort();
    let excess = backups.len().saturating_sub(keep);
    for old in backups.iter().take(excess) {
        tokio::fs::remove_file(old)
            .await
            .with_context(|| format!("Failed to remove old backup: {}", old.display()))?;
    }
    Ok(excess)
}

#[cfg(test)]
#[path = "tests/writer_tests.rs"]
mod tests;
