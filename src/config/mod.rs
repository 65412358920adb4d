//! Run configuration
//!
//! [`RunConfig`] is built once from the parsed CLI, validated, and then only
//! ever handed out by shared reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cli::Cli;

pub const DEFAULT_SSH_OPTS: &str = "-o StrictHostKeyChecking=no -o BatchMode=yes -o ConnectTimeout=10";
pub const DEFAULT_REBOOT_CMD: &str = "sudo systemctl reboot || sudo reboot";
pub const DEFAULT_HOST_TEMPLATE: &str = "%s";
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BOOT_ID_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_GRACE_PERIOD_SECS: u32 = 30;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 5;
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 60;

/// Placeholder in the host template replaced by the node name
pub const HOST_PLACEHOLDER: &str = "%s";

/// Prefix of comment lines in a node list file
const COMMENT_PREFIX: &str = "#";

/// Errors for configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read node list {path}: {source}")]
    NodesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("SSH host template '{0}' must contain the '%s' placeholder")]
    InvalidHostTemplate(String),

    #[error("Reboot command must not be empty")]
    EmptyRebootCommand,
}

/// How to reach nodes over SSH
#[derive(Debug, Clone, PartialEq)]
pub struct SshSettings {
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,

    /// Extra arguments for the ssh client, already split
    pub options: Vec<String>,

    /// Host template with a `%s` placeholder for the node name
    pub host_template: String,

    /// Upper bound for a single remote command
    pub command_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            identity_file: None,
            options: split_ssh_options(DEFAULT_SSH_OPTS),
            host_template: DEFAULT_HOST_TEMPLATE.to_string(),
            command_timeout: Duration::from_secs(DEFAULT_SSH_TIMEOUT_SECS),
        }
    }
}

/// Immutable settings for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Explicit node names, in order; duplicates are kept
    pub nodes: Vec<String>,

    /// File to read node names from when no explicit names are given
    pub nodes_file: Option<PathBuf>,

    /// Target every node in the cluster when no other source is given
    pub all_nodes: bool,

    pub exclude_control_plane: bool,
    pub exclude_nodes: Vec<String>,

    /// No mutating call reaches the cluster or the remote shell
    pub dry_run: bool,

    pub reboot_command: String,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub boot_id_timeout: Duration,
    pub ready_timeout: Duration,
    pub grace_period_secs: u32,

    /// Fail the node when the boot ID does not change
    pub reboot_verification_required: bool,

    /// Pause before the first node is touched
    pub initial_delay: Duration,

    pub ssh: SshSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            nodes_file: None,
            all_nodes: false,
            exclude_control_plane: false,
            exclude_nodes: Vec::new(),
            dry_run: false,
            reboot_command: DEFAULT_REBOOT_CMD.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            boot_id_timeout: Duration::from_secs(DEFAULT_BOOT_ID_TIMEOUT_SECS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            reboot_verification_required: true,
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS),
            ssh: SshSettings::default(),
        }
    }
}

impl RunConfig {
    /// Build and validate the run configuration from parsed arguments
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let config = Self {
            nodes: cli.nodes.clone(),
            nodes_file: cli.file.clone(),
            all_nodes: cli.all,
            exclude_control_plane: cli.exclude_control_plane,
            exclude_nodes: parse_exclude_list(&cli.exclude_nodes),
            dry_run: cli.dry_run,
            reboot_command: cli.reboot_cmd.clone(),
            poll_interval: Duration::from_secs(cli.poll_interval),
            drain_timeout: Duration::from_secs(cli.drain_timeout),
            boot_id_timeout: Duration::from_secs(cli.timeout_boot_id),
            ready_timeout: Duration::from_secs(cli.timeout_ready),
            grace_period_secs: cli.grace_period,
            reboot_verification_required: !cli.allow_uncordon_without_reboot,
            initial_delay: Duration::from_secs(cli.initial_delay),
            ssh: SshSettings {
                user: cli.ssh_user.clone().filter(|u| !u.is_empty()),
                identity_file: cli.ssh_identity.as_deref().map(expand_path),
                options: split_ssh_options(&cli.ssh_opts),
                host_template: cli.ssh_host_template.clone(),
                command_timeout: Duration::from_secs(cli.ssh_timeout),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if !self.ssh.host_template.contains(HOST_PLACEHOLDER) {
            return Err(ConfigError::InvalidHostTemplate(
                self.ssh.host_template.clone(),
            ));
        }
        if self.reboot_command.trim().is_empty() {
            return Err(ConfigError::EmptyRebootCommand);
        }
        Ok(())
    }
}

// ============================================================================
// SBIO: Pure parsing helpers (no I/O)
// ============================================================================

/// Parse a node list: one name per line, blank lines and `#` comments skipped
pub fn parse_nodes_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Normalise `--exclude-nodes` values: trim and drop empties
pub fn parse_exclude_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split the `--ssh-opts` string into individual arguments
pub fn split_ssh_options(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Expand `~` and environment variables in a user supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Read a node list file from disk
pub fn read_nodes_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::NodesFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_nodes_list(&content))
}
