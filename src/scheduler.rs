//! Fixed-delay pass loop.
//!
//! A pass runs to completion, then the loop waits `delay` before the next
//! one, so passes never overlap and a slow pass pushes the schedule back.
//! Each pass runs in its own task: an error or a panic is logged and the
//! loop carries on.

use anyhow::Result;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    delay: Option<Duration>,
}

impl Scheduler {
    /// A delay of zero or less runs exactly one pass.
    pub fn new(delay_minutes: i64) -> Self {
        let delay = u64::try_from(delay_minutes)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)));
        Self { delay }
    }

    #[cfg(test)]
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Runs passes until `stop` fires (or its sender is dropped), or after
    /// the first pass when there is no delay. Returns the number of passes.
    pub async fn run<F, Fut, T>(&self, mut pass: F, mut stop: mpsc::Receiver<()>) -> usize
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Display + Send + 'static,
    {
        let mut passes = 0usize;
        loop {
            passes += 1;
            match tokio::spawn(pass()).await {
                Ok(Ok(report)) => tracing::info!(pass = passes, "Pass complete: {}", report),
                Ok(Err(e)) => tracing::error!(pass = passes, "Pass failed: {:#}", e),
                Err(e) if e.is_panic() => tracing::error!(pass = passes, "Pass panicked: {}", e),
                Err(e) => tracing::error!(pass = passes, "Pass task failed: {}", e),
            }

            let Some(delay) = self.delay else {
                break;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.recv() => {
                    tracing::info!("Stop requested, no further passes scheduled");
                    break;
                }
            }
        }
        passes
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
