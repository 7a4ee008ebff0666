//! Command execution capability
//!
//! External tools are the only interface to the OS this crate has. Every
//! component receives a [`CmdRunner`] instead of spawning processes itself,
//! so tests can substitute a recording fake.

use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs a named program with arguments.
///
/// A non-zero exit status is reported as [`PlatformError::CommandFailed`],
/// which still carries stdout and stderr.
#[async_trait]
pub trait CmdRunner: Send + Sync {
    async fn run_command(&self, name: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Render a command line for logs and error messages
pub fn command_line(name: &str, args: &[&str]) -> String {
    if args.is_empty() {
        name.to_string()
    } else {
        format!("{} {}", name, args.join(" "))
    }
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecCmdRunner;

#[async_trait]
impl CmdRunner for ExecCmdRunner {
    async fn run_command(&self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        let command = command_line(name, args);
        debug!(command = %command, "Running command");

        let output = Command::new(name)
            .args(args)
            .output()
            .await
            .map_err(|source| PlatformError::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        // Killed by a signal has no code
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            debug!(command = %command, exit_code, stderr = %stderr.trim(), "Command failed");
            return Err(PlatformError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
