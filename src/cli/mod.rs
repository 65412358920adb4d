//! CLI module for k8s-restart
//!
//! Argument parsing lives here; turning arguments into a validated
//! [`RunConfig`](crate::config::RunConfig) is done by the config module and
//! all output formatting by [`display`].

use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{
    DEFAULT_BOOT_ID_TIMEOUT_SECS, DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_GRACE_PERIOD_SECS,
    DEFAULT_HOST_TEMPLATE, DEFAULT_INITIAL_DELAY_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_READY_TIMEOUT_SECS, DEFAULT_REBOOT_CMD, DEFAULT_SSH_OPTS, DEFAULT_SSH_TIMEOUT_SECS,
};

mod display;

pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "k8s-restart")]
#[command(about = "Safely restart Kubernetes nodes: drain, reboot over SSH, verify, uncordon")]
#[command(version)]
#[command(after_help = "EXAMPLES:
    k8s-restart node1 node2
    k8s-restart --all --exclude-control-plane --dry-run
    k8s-restart -f nodes.txt
    k8s-restart -u myuser -i ~/.ssh/mykey node1")]
pub struct Cli {
    /// Node names to restart, in order
    pub nodes: Vec<String>,

    /// Read node names from a file (one per line, '#' starts a comment)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Restart every node in the cluster
    #[arg(long)]
    pub all: bool,

    /// Skip control plane nodes when using --all
    #[arg(long)]
    pub exclude_control_plane: bool,

    /// Comma-separated node names to leave out (e.g. node1,node2)
    #[arg(long, value_delimiter = ',', value_name = "NODES")]
    pub exclude_nodes: Vec<String>,

    /// SSH username
    #[arg(short = 'u', long)]
    pub ssh_user: Option<String>,

    /// SSH private key file
    #[arg(short = 'i', long, value_name = "FILE")]
    pub ssh_identity: Option<PathBuf>,

    /// Options passed to the ssh client
    #[arg(long, default_value = DEFAULT_SSH_OPTS, allow_hyphen_values = true)]
    pub ssh_opts: String,

    /// SSH host template, '%s' is replaced by the node name (e.g. %s.example.com)
    #[arg(long, default_value = DEFAULT_HOST_TEMPLATE)]
    pub ssh_host_template: String,

    /// Seconds before a remote command is abandoned
    #[arg(long, default_value_t = DEFAULT_SSH_TIMEOUT_SECS)]
    pub ssh_timeout: u64,

    /// Reboot command to execute on the node
    #[arg(long, default_value = DEFAULT_REBOOT_CMD)]
    pub reboot_cmd: String,

    /// Seconds to wait for evicted pods to leave the node
    #[arg(long, default_value_t = DEFAULT_DRAIN_TIMEOUT_SECS)]
    pub drain_timeout: u64,

    /// Grace period in seconds handed to each pod eviction
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period: u32,

    /// Polling interval in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// Seconds to wait for the boot ID to change
    #[arg(long = "timeout-bootid", default_value_t = DEFAULT_BOOT_ID_TIMEOUT_SECS)]
    pub timeout_boot_id: u64,

    /// Seconds to wait for the node to become Ready
    #[arg(long, default_value_t = DEFAULT_READY_TIMEOUT_SECS)]
    pub timeout_ready: u64,

    /// Uncordon even if the reboot could not be confirmed
    #[arg(long)]
    pub allow_uncordon_without_reboot: bool,

    /// Seconds to wait before touching the first node
    #[arg(long, default_value_t = DEFAULT_INITIAL_DELAY_SECS)]
    pub initial_delay: u64,

    /// Path to kubeconfig file
    #[arg(long, env = "KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Show what would be done without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Format of the final run summary
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Enable verbose logging output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Run summary rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
