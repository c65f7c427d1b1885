//! Typed JSON key/value store for state that must survive between passes.
//!
//! Each key maps to a single file `<dir>/<key>.json`. Reads never fail hard:
//! a missing file is [`CacheRead::NotFound`] and an unreadable or unparsable one
//! is [`CacheRead::Corrupt`], so callers can distinguish the two while still
//! falling back to an empty state.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Outcome of reading a cache entry.
#[derive(Debug)]
pub enum CacheRead<T> {
    /// The entry was never written.
    NotFound,
    /// The entry exists but could not be read or decoded.
    Corrupt(String),
    Found(T),
}

/// File-backed key/value store rooted at a directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the file path backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheRead<T> {
        let path = self.path_for(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return CacheRead::NotFound,
            Err(e) => {
                return CacheRead::Corrupt(format!("failed to read {}: {}", path.display(), e))
            }
        };

        match serde_json::from_slice(&content) {
            Ok(value) => CacheRead::Found(value),
            Err(e) => CacheRead::Corrupt(format!("failed to parse {}: {}", path.display(), e)),
        }
    }

    /// Reads `key`, treating a missing or corrupt entry as the default value.
    pub async fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get(key).await {
            CacheRead::Found(value) => value,
            CacheRead::NotFound => T::default(),
            CacheRead::Corrupt(reason) => {
                tracing::warn!(key, "Discarding unreadable cache entry: {}", reason);
                T::default()
            }
        }
    }

    /// Writes `value` under `key` via temp file + rename.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;

        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec(value)
            .with_context(|| format!("Failed to serialize cache entry: {}", key))?;

        tokio::fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write temp cache file: {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
        Ok(())
    }

    /// Deletes `key`. Removing a key that was never written is not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove cache file: {}", path.display())),
        }
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/cache_store_tests.rs"]
mod tests;
