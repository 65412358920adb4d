//! Remote command execution over SSH
//!
//! The reboot itself is triggered out of band through [`RemoteExec`]. The
//! shipped implementation, [`SshRunner`], drives the system `ssh` client.
//!
//! A reboot command usually kills the session that carries it, so a failure
//! (non-zero exit or hung session) while running a command that matches the
//! reboot pattern is reported as [`RemoteOutcome::ConnectionDropped`] rather
//! than as an error. Whether the node really went down is settled afterwards
//! by boot ID verification.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{SshSettings, HOST_PLACEHOLDER};

/// Pattern that marks a command as a reboot
const REBOOT_PATTERN: &str = "reboot";

/// Login used when the address carries no user
pub const DEFAULT_SSH_USER: &str = "root";

/// Errors from running a remote command
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("failed to launch ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("command failed on {address} (exit code {code}): {stderr}")]
    Failed {
        address: String,
        code: i32,
        stderr: String,
    },

    #[error("command on {address} did not finish within {}s", .timeout.as_secs())]
    Timeout { address: String, timeout: Duration },
}

/// How a remote command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Command ran to completion with exit status 0
    Completed,
    /// Session was lost while running a reboot command
    ConnectionDropped,
}

/// Runs a command on a remote host
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// `address` is `[user@]host`
    async fn run(&self, address: &str, command: &str) -> Result<RemoteOutcome, RemoteError>;
}

/// One node and how to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    pub node: String,
    pub address: String,
}

impl NodeTarget {
    pub fn resolve(node: &str, ssh: &SshSettings) -> Self {
        Self {
            node: node.to_string(),
            address: build_address(&ssh.host_template, ssh.user.as_deref(), node),
        }
    }
}

// ============================================================================
// SBIO: Pure helpers (no I/O)
// ============================================================================

/// Substitute the node into the host template and prefix the user when the
/// template has none
pub fn build_address(template: &str, user: Option<&str>, node: &str) -> String {
    let host = template.replace(HOST_PLACEHOLDER, node);
    match user {
        Some(user) if !user.is_empty() && !host.contains('@') => format!("{}@{}", user, host),
        _ => host,
    }
}

/// Split `[user@]host` at the first `@`, defaulting the user to root
pub fn split_address(address: &str) -> (String, String) {
    match address.split_once('@') {
        Some((user, host)) => (user.to_string(), host.to_string()),
        None => (DEFAULT_SSH_USER.to_string(), address.to_string()),
    }
}

/// Whether losing the connection is the expected result of `command`
pub fn is_reboot_command(command: &str) -> bool {
    command.to_lowercase().contains(REBOOT_PATTERN)
}

// ============================================================================
// SSH runner
// ============================================================================

/// [`RemoteExec`] backed by the system `ssh` binary
#[derive(Debug, Clone)]
pub struct SshRunner {
    program: String,
    options: Vec<String>,
    identity_file: Option<PathBuf>,
    timeout: Duration,
}

impl SshRunner {
    pub fn new(settings: &SshSettings) -> Self {
        Self {
            program: "ssh".to_string(),
            options: settings.options.clone(),
            identity_file: settings.identity_file.clone(),
            timeout: settings.command_timeout,
        }
    }

    /// Use a different client binary (e.g. a wrapper script)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the ssh client for one command
    pub fn command_args(&self, address: &str, command: &str) -> Vec<String> {
        let (user, host) = split_address(address);
        let mut args = self.options.clone();
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push("-l".to_string());
        args.push(user);
        args.push(host);
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExec for SshRunner {
    async fn run(&self, address: &str, command: &str) -> Result<RemoteOutcome, RemoteError> {
        info!(address = %address, command = %command, "Executing SSH command");
        let reboot = is_reboot_command(command);

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(address, command)).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) if reboot => {
                debug!(address = %address, "Session hung after reboot command");
                return Ok(RemoteOutcome::ConnectionDropped);
            }
            Err(_) => {
                return Err(RemoteError::Timeout {
                    address: address.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            return Ok(RemoteOutcome::Completed);
        }
        if reboot {
            debug!(
                address = %address,
                code = output.status.code().unwrap_or(-1),
                "Connection lost during reboot command"
            );
            return Ok(RemoteOutcome::ConnectionDropped);
        }

        Err(RemoteError::Failed {
            address: address.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
