//! Resumable reader over the access log.
//!
//! A [`Tailer`] pairs a log path with a cursor key in the [`CacheStore`].
//! Opening it seeks to the persisted offset and yields parsed events one line
//! at a time. The cursor only moves when [`TailSession::commit`] is called, and
//! then only over newline-terminated lines: a partial line at EOF (the proxy
//! still writing it) is left for the next run.

use super::parser::{parse_line, LogEvent};
use crate::cache_store::CacheStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Persisted read position for one (file, purpose) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub source: PathBuf,
    pub offset: u64,
}

/// Counts from one drain of the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub events: usize,
    pub rejected: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Tailer {
    path: PathBuf,
    cursor_key: String,
    store: CacheStore,
}

impl Tailer {
    pub fn new(path: impl Into<PathBuf>, cursor_key: impl Into<String>, store: CacheStore) -> Self {
        Self {
            path: path.into(),
            cursor_key: cursor_key.into(),
            store,
        }
    }

    /// Opens the log and positions it at the persisted cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or seeked. The cursor is
    /// not modified in that case.
    pub async fn open(&self) -> Result<TailSession> {
        let mut file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open access log: {}", self.path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat access log: {}", self.path.display()))?
            .len();

        let cursor: Cursor = self.store.get_or_default(&self.cursor_key).await;
        let mut start = if cursor.source == self.path {
            cursor.offset
        } else {
            0
        };
        if start > len {
            tracing::warn!(
                cursor = %self.cursor_key,
                offset = start,
                len,
                "Access log is shorter than its cursor, assuming it was truncated"
            );
            start = 0;
        }

        file.seek(std::io::SeekFrom::Start(start))
            .await
            .with_context(|| format!("Failed to seek access log: {}", self.path.display()))?;

        Ok(TailSession {
            reader: BufReader::new(file),
            store: self.store.clone(),
            cursor_key: self.cursor_key.clone(),
            source: self.path.clone(),
            start,
            consumed: 0,
            line: Vec::new(),
            summary: DrainSummary::default(),
            exhausted: false,
        })
    }
}

/// An open, forward-only pass over the log.
pub struct TailSession {
    reader: BufReader<File>,
    store: CacheStore,
    cursor_key: String,
    source: PathBuf,
    start: u64,
    consumed: u64,
    line: Vec<u8>,
    summary: DrainSummary,
    exhausted: bool,
}

impl TailSession {
    /// Returns the next parsed event, skipping rejected lines.
    /// Returns `None` at EOF or at a trailing partial line.
    pub async fn next_event(&mut self) -> Result<Option<LogEvent>> {
        while !self.exhausted {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .with_context(|| format!("Failed to read access log: {}", self.source.display()))?;

            if read == 0 || self.line.last() != Some(&b'\n') {
                self.exhausted = true;
                break;
            }
            self.consumed += read as u64;

            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim_end();
            match parse_line(text) {
                Some(event) => {
                    self.summary.events += 1;
                    tracing::trace!(
                        user = %event.user,
                        destination = %event.destination,
                        route = %event.route,
                        "Access log connection"
                    );
                    return Ok(Some(event));
                }
                None if text.is_empty() => {}
                None => self.summary.rejected += 1,
            }
        }
        Ok(None)
    }

    /// Absolute offset just past the last fully consumed line.
    pub fn offset(&self) -> u64 {
        self.start + self.consumed
    }

    /// Persists the cursor and returns what this session consumed.
    pub async fn commit(self) -> Result<DrainSummary> {
        let cursor = Cursor {
            source: self.source.clone(),
            offset: self.offset(),
        };
        self.store
            .set(&self.cursor_key, &cursor)
            .await
            .with_context(|| format!("Failed to persist cursor {}", self.cursor_key))?;

        if self.summary.rejected > 0 {
            tracing::debug!(
                cursor = %self.cursor_key,
                rejected = self.summary.rejected,
                "Skipped unparseable access log lines"
            );
        }

        Ok(DrainSummary {
            bytes: self.consumed,
            ..self.summary
        })
    }
}

#[cfg(test)]
#[path = "tests/tailer_tests.rs"]
mod tests;
