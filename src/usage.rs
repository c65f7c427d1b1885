//! Per-account connection history derived from the access log.
//!
//! Each user's record is only ever widened (earliest first connect, latest
//! last connect), so replaying lines that were already folded in is harmless.
//! This is what makes the at-least-once tailer safe to use here.

use crate::access_log::{DrainSummary, LogEvent, Tailer};
use crate::cache_store::CacheStore;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const USAGE_RECORDS_KEY: &str = "usage-records";
pub const USAGE_CURSOR_KEY: &str = "usage-cursor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user: String,
    pub first_connect: DateTime<Utc>,
    pub last_connect: DateTime<Utc>,
}

impl UsageRecord {
    fn new(user: &str, at: DateTime<Utc>) -> Self {
        Self {
            user: user.to_string(),
            first_connect: at,
            last_connect: at,
        }
    }

    fn widen(&mut self, first: DateTime<Utc>, last: DateTime<Utc>) {
        self.first_connect = self.first_connect.min(first);
        self.last_connect = self.last_connect.max(last);
    }
}

/// Folds log events into one [`UsageRecord`] per user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageAggregator {
    records: BTreeMap<String, UsageRecord>,
}

impl UsageAggregator {
    /// Loads the persisted records. A missing or corrupt entry yields an
    /// empty aggregator.
    pub async fn load(store: &CacheStore) -> Self {
        let stored: Vec<UsageRecord> = store.get_or_default(USAGE_RECORDS_KEY).await;
        let mut aggregator = Self::default();
        for record in stored {
            aggregator.merge(record);
        }
        aggregator
    }

    pub async fn save(&self, store: &CacheStore) -> Result<()> {
        let records: Vec<&UsageRecord> = self.records.values().collect();
        store.set(USAGE_RECORDS_KEY, &records).await
    }

    pub fn observe(&mut self, event: &LogEvent) {
        self.records
            .entry(event.user.clone())
            .and_modify(|record| record.widen(event.timestamp, event.timestamp))
            .or_insert_with(|| UsageRecord::new(&event.user, event.timestamp));
    }

    fn merge(&mut self, record: UsageRecord) {
        match self.records.get_mut(&record.user) {
            Some(existing) => existing.widen(record.first_connect, record.last_connect),
            None => {
                self.records.insert(record.user.clone(), record);
            }
        }
    }

    pub fn get(&self, user: &str) -> Option<&UsageRecord> {
        self.records.get(user)
    }

    /// Returns a copy of all records keyed by user.
    pub fn snapshot(&self) -> BTreeMap<String, UsageRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Folds new access log lines into the persisted usage records.
///
/// With `rebuild`, the cursor and records are discarded first so the whole
/// log is replayed. The records are saved before the cursor advances; a crash
/// in between only replays lines, which widening absorbs.
///
/// # Errors
///
/// Returns an error if the log cannot be read or the cache cannot be written.
pub async fn refresh_usage(
    store: &CacheStore,
    log_path: &Path,
    rebuild: bool,
) -> Result<(UsageAggregator, DrainSummary)> {
    if rebuild {
        store.remove(USAGE_CURSOR_KEY).await?;
        store.remove(USAGE_RECORDS_KEY).await?;
    }

    let mut usage = UsageAggregator::load(store).await;
    let mut session = Tailer::new(log_path, USAGE_CURSOR_KEY, store.clone())
        .open()
        .await?;
    while let Some(event) = session.next_event().await? {
        usage.observe(&event);
    }

    usage.save(store).await?;
    let summary = session.commit().await?;
    tracing::debug!(
        users = usage.len(),
        events = summary.events,
        bytes = summary.bytes,
        "Usage records refreshed"
    );
    Ok((usage, summary))
}

/// Usage records for the `usage` command.
///
/// Without `exclusive` another instance owns the caches, so the stored records
/// are returned as they are and neither the log nor the cursor is touched.
///
/// # Errors
///
/// Returns an error if a rebuild is asked for without `exclusive`, or if the
/// refresh fails.
pub async fn current_usage(
    store: &CacheStore,
    log_path: &Path,
    rebuild: bool,
    exclusive: bool,
) -> Result<UsageAggregator> {
    if !exclusive {
        if rebuild {
            bail!("Cannot rebuild usage records while another xray-guard instance is running");
        }
        tracing::warn!("Another xray-guard instance is running, showing stored usage records");
        return Ok(UsageAggregator::load(store).await);
    }

    let (usage, summary) = refresh_usage(store, log_path, rebuild).await?;
    tracing::info!(
        users = usage.len(),
        events = summary.events,
        rejected = summary.rejected,
        rebuild,
        "Usage records refreshed"
    );
    Ok(usage)
}

#[cfg(test)]
#[path = "tests/usage_tests.rs"]
mod tests;
