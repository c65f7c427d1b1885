//! The shared Xray configuration document.
//!
//! Accounts in this document are also edited by the dashboard, so every pass
//! reads it fresh from disk and writes it back whole.

pub mod schema;
pub mod timestamp;
pub mod writer;

pub use schema::{Account, AccountStatus, ConfigDocument};
pub use timestamp::ConfigTime;
pub use writer::write_config;

use anyhow::{Context, Result};
use std::path::Path;

/// Reads and parses the configuration document.
///
/// Entries reported by [`ConfigDocument::validate`] are not errors here;
/// the caller decides how to report them.
///
/// # Errors
///
/// Returns an error if the file is unreadable or is not valid JSON of the
/// expected shape.
pub async fn load_config(path: &Path) -> Result<ConfigDocument> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
