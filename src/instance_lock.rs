//! Keeps two guard processes from working on one cache directory.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "xray-guard.lock";

/// Exclusive lock held for the life of the process. Released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or another process
    /// already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        match Self::try_acquire(dir)? {
            Some(lock) => Ok(lock),
            None => bail!(
                "Another xray-guard instance is running (lock held on {})",
                dir.join(LOCK_FILE_NAME).display()
            ),
        }
    }

    /// Like [`InstanceLock::acquire`], but returns `None` when another process
    /// holds the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
#[path = "tests/instance_lock_tests.rs"]
mod tests;
