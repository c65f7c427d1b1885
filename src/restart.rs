//! Tells the proxy to reload its configuration after a change was written.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

pub const DEFAULT_RESTART_COMMAND: &str = "systemctl restart xray";

#[async_trait]
pub trait RestartSignal: Send + Sync {
    async fn restart(&self) -> Result<()>;
}

/// Runs an external command, e.g. `systemctl restart xray`.
#[derive(Debug, Clone)]
pub struct CommandRestart {
    program: String,
    args: Vec<String>,
}

impl CommandRestart {
    /// Splits `command_line` on whitespace. The program is looked up on `PATH`
    /// only when it is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command line is empty.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("Restart command is empty");
        };
        Ok(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the program cannot be found on `PATH`.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        which::which(&self.program)
            .with_context(|| format!("Restart program not found: {}", self.program))
    }
}

#[async_trait]
impl RestartSignal for CommandRestart {
    async fn restart(&self) -> Result<()> {
        let program = self.resolve_program()?;
        let output = Command::new(&program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            );
        }
        tracing::info!(program = %program.display(), "Proxy restart signalled");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/restart_tests.rs"]
mod tests;
