//! One ingest, decide, mutate and restart cycle.

use crate::access_log::DrainSummary;
use crate::cache_store::CacheStore;
use crate::policy::{PolicyEngine, PolicyOptions, Transition};
use crate::restart::RestartSignal;
use crate::settings::GuardPaths;
use crate::usage::{refresh_usage, UsageAggregator};
use crate::window::{refresh_window, FlaggedUsers};
use crate::xray_config::{load_config, write_config};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassOptions {
    /// Compute and log transitions without writing the config or restarting.
    pub dry_run: bool,
    pub policy: PolicyOptions,
}

/// What a pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub events: usize,
    pub rejected_lines: usize,
    pub flagged: usize,
    pub transitions: Vec<Transition>,
    pub backup: Option<PathBuf>,
    pub written: bool,
    pub restarted: bool,
}

impl Display for PassReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new events, {} flagged, {} transitions",
            self.events,
            self.flagged,
            self.transitions.len()
        )?;
        if self.rejected_lines > 0 {
            write!(f, ", {} unparseable lines", self.rejected_lines)?;
        }
        if self.written {
            write!(f, ", config written")?;
        }
        if self.restarted {
            write!(f, ", proxy restarted")?;
        }
        Ok(())
    }
}

/// Everything a pass learns before it touches the config.
#[derive(Debug)]
struct Observation {
    usage: UsageAggregator,
    summary: DrainSummary,
    flagged: FlaggedUsers,
}

pub struct PolicyPass {
    paths: GuardPaths,
    store: CacheStore,
    options: PassOptions,
    restart: Arc<dyn RestartSignal>,
}

impl PolicyPass {
    pub fn new(paths: GuardPaths, options: PassOptions, restart: Arc<dyn RestartSignal>) -> Self {
        let store = CacheStore::new(paths.cache_dir.clone());
        Self {
            paths,
            store,
            options,
            restart,
        }
    }

    /// Runs one pass at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log or config cannot be read, the caches cannot
    /// be written, or the config write fails. A failed restart is only logged.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let observation = self.observe(now).await?;
        self.enforce(observation, now).await
    }

    /// Reads the config for lookups and folds new log lines into the caches.
    async fn observe(&self, now: DateTime<Utc>) -> Result<Observation> {
        let range_minutes = self.options.policy.range_minutes;

        let lookup = load_config(&self.paths.config).await?;
        for issue in lookup.validate() {
            tracing::warn!("Skipping config entry: {}", issue);
        }
        let limits = lookup.connection_limits();

        let (usage, summary) = refresh_usage(&self.store, &self.paths.access_log, false).await?;
        let window = refresh_window(&self.store, &self.paths.access_log, range_minutes, now).await?;
        let flagged = window.flag_multiple_access(&limits);
        if !flagged.is_empty() {
            tracing::info!(accounts = flagged.len(), range_minutes, "Accounts over their connection limit");
        }

        Ok(Observation {
            usage,
            summary,
            flagged,
        })
    }

    /// Applies the rules to a freshly loaded config and writes it back.
    async fn enforce(&self, observation: Observation, now: DateTime<Utc>) -> Result<PassReport> {
        let Observation {
            usage,
            summary,
            flagged,
        } = observation;

        // Reloaded so edits made while the log was being read aren't lost.
        let mut document = load_config(&self.paths.config).await?;
        let transitions =
            PolicyEngine::new(self.options.policy).apply(&mut document, &flagged, &usage, now);
        for transition in &transitions {
            tracing::info!(dry_run = self.options.dry_run, "Account {}", transition);
        }

        let mut report = PassReport {
            events: summary.events,
            rejected_lines: summary.rejected,
            flagged: flagged.len(),
            transitions,
            ..PassReport::default()
        };
        if report.transitions.is_empty() || self.options.dry_run {
            return Ok(report);
        }

        report.backup = write_config(&self.paths.config, &document, now).await?;
        report.written = true;
        if let Some(backup) = &report.backup {
            tracing::info!(backup = %backup.display(), "Config written");
        }
        match self.restart.restart().await {
            Ok(()) => report.restarted = true,
            Err(e) => tracing::warn!("Failed to restart proxy: {:#}", e),
        }
        Ok(report)
    }
}

#[cfg(test)]
#[path = "tests/pass_tests.rs"]
mod tests;
