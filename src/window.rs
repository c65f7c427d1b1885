//! Trailing window of accepted connections for multi-IP abuse detection.
//!
//! The buffer survives between passes in the cache store (keyed by the window
//! size), so a restart in the middle of a window doesn't forget the IPs seen
//! so far. After every refresh it holds no entry older than `now - range`.

use crate::access_log::{LogEvent, Tailer};
use crate::cache_store::CacheStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Distinct IPs allowed per account when it sets no `maxConnections`.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 3;

pub fn window_entries_key(range_minutes: u32) -> String {
    format!("window-entries-{}m", range_minutes)
}

pub fn window_cursor_key(range_minutes: u32) -> String {
    format!("window-cursor-{}m", range_minutes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    pub user: String,
    pub client_ip: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WindowBuffer {
    range_minutes: u32,
    entries: Vec<WindowEntry>,
}

impl WindowBuffer {
    pub fn new(range_minutes: u32) -> Self {
        Self {
            range_minutes,
            entries: Vec::new(),
        }
    }

    pub async fn load(store: &CacheStore, range_minutes: u32) -> Self {
        let mut window = Self::new(range_minutes);
        window.entries = store
            .get_or_default(&window_entries_key(range_minutes))
            .await;
        window
    }

    pub async fn save(&self, store: &CacheStore) -> Result<()> {
        store
            .set(&window_entries_key(self.range_minutes), &self.entries)
            .await
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(i64::from(self.range_minutes))
    }

    /// Buffers an accepted event that falls inside the window.
    /// Returns whether the event was kept.
    pub fn observe(&mut self, event: &LogEvent, now: DateTime<Utc>) -> bool {
        if !event.is_accepted() || event.timestamp < self.cutoff(now) {
            return false;
        }
        self.entries.push(WindowEntry {
            user: event.user.clone(),
            client_ip: event.client_ip().to_string(),
            timestamp: event.timestamp,
        });
        true
    }

    /// Drops entries older than the window. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let before = self.entries.len();
        self.entries.retain(|entry| entry.timestamp >= cutoff);
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[WindowEntry] {
        &self.entries
    }

    /// Distinct client IPs per user, in the order they were first seen.
    pub fn distinct_ips(&self) -> BTreeMap<String, Vec<String>> {
        let mut by_user: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            let ips = by_user.entry(entry.user.clone()).or_default();
            if !ips.contains(&entry.client_ip) {
                ips.push(entry.client_ip.clone());
            }
        }
        by_user
    }

    /// Users whose distinct IP count exceeds their connection limit.
    /// `limits` holds per-account `maxConnections`; others get
    /// [`DEFAULT_MAX_CONNECTIONS`].
    pub fn flag_multiple_access(&self, limits: &HashMap<String, u32>) -> FlaggedUsers {
        let flagged = self
            .distinct_ips()
            .into_iter()
            .filter(|(user, ips)| {
                let limit = limits
                    .get(user)
                    .copied()
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS);
                ips.len() > limit as usize
            })
            .collect();
        FlaggedUsers(flagged)
    }
}

/// Users flagged for multiple access, with the IPs that tripped the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlaggedUsers(BTreeMap<String, Vec<String>>);

impl FlaggedUsers {
    pub fn contains(&self, user: &str) -> bool {
        self.0.contains_key(user)
    }

    pub fn ips(&self, user: &str) -> Option<&[String]> {
        self.0.get(user).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runs the window step of a pass: tail new lines with the window's own
/// cursor, buffer the recent accepted ones, prune, and persist.
///
/// # Errors
///
/// Returns an error if the log cannot be read or the cache cannot be written.
/// The cursor is only advanced after the buffer has been saved.
pub async fn refresh_window(
    store: &CacheStore,
    log_path: &Path,
    range_minutes: u32,
    now: DateTime<Utc>,
) -> Result<WindowBuffer> {
    let mut window = WindowBuffer::load(store, range_minutes).await;
    let mut session = Tailer::new(log_path, window_cursor_key(range_minutes), store.clone())
        .open()
        .await?;

    let mut kept = 0usize;
    while let Some(event) = session.next_event().await? {
        if window.observe(&event, now) {
            kept += 1;
        }
    }
    let pruned = window.prune(now);

    window.save(store).await?;
    let summary = session.commit().await?;
    tracing::debug!(
        range_minutes,
        events = summary.events,
        kept,
        pruned,
        buffered = window.entries().len(),
        "Connection window refreshed"
    );
    Ok(window)
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
