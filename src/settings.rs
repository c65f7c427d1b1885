//! Filesystem locations and the restart command, resolved from the environment.
//!
//! - `XRAY_GUARD_CONFIG` - proxy configuration document
//! - `XRAY_GUARD_ACCESS_LOG` - proxy access log
//! - `XRAY_GUARD_CACHE_DIR` - cursors, usage records and window buffers
//! - `XRAY_GUARD_RESTART_CMD` - command that reloads the proxy

use crate::restart::DEFAULT_RESTART_COMMAND;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub const CONFIG_ENV: &str = "XRAY_GUARD_CONFIG";
pub const ACCESS_LOG_ENV: &str = "XRAY_GUARD_ACCESS_LOG";
pub const CACHE_DIR_ENV: &str = "XRAY_GUARD_CACHE_DIR";
pub const RESTART_CMD_ENV: &str = "XRAY_GUARD_RESTART_CMD";

const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/xray/config.json";
const DEFAULT_ACCESS_LOG_PATH: &str = "/var/log/xray/access.log";
const GUARD_HOME_DIR: &str = ".xray-guard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPaths {
    pub config: PathBuf,
    pub access_log: PathBuf,
    pub cache_dir: PathBuf,
    pub restart_command: String,
}

impl GuardPaths {
    /// # Errors
    ///
    /// Returns an error if no cache directory is configured and the home
    /// directory cannot be determined.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            config: config_path(),
            access_log: access_log_path(),
            cache_dir: cache_dir()?,
            restart_command: restart_command(),
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Returns the proxy configuration path: `$XRAY_GUARD_CONFIG` or
/// `/usr/local/etc/xray/config.json`.
pub fn config_path() -> PathBuf {
    env_value(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn access_log_path() -> PathBuf {
    env_value(ACCESS_LOG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ACCESS_LOG_PATH))
}

/// Returns the cache directory: `$XRAY_GUARD_CACHE_DIR` or `~/.xray-guard/cache/`.
///
/// The directory itself is created on first write.
pub fn cache_dir() -> Result<PathBuf> {
    if let Some(dir) = env_value(CACHE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Could not determine home directory for cache storage")?;
    Ok(home.join(GUARD_HOME_DIR).join("cache"))
}

pub fn restart_command() -> String {
    env_value(RESTART_CMD_ENV).unwrap_or_else(|| DEFAULT_RESTART_COMMAND.to_string())
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
