//! Run events and the sinks that consume them
//!
//! Components report what they do as [`RunEvent`]s through an injected
//! [`EventSink`] instead of writing to a global logger. The binary uses
//! [`TracingSink`]; tests use [`MemorySink`] to assert on what happened.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::drain::Protection;
use crate::lifecycle::NodeState;

/// Something worth reporting during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        nodes: Vec<String>,
        dry_run: bool,
    },
    NodesExcluded {
        nodes: Vec<String>,
    },
    ExcludeMismatch {
        missing: Vec<String>,
    },
    InitialDelay {
        seconds: u64,
    },
    NodeStarted {
        node: String,
        address: String,
    },
    PhaseEntered {
        node: String,
        phase: NodeState,
    },
    PhasesSkipped {
        node: String,
        phases: Vec<NodeState>,
    },
    AlreadyCordoned {
        node: String,
    },
    Cordoned {
        node: String,
        dry_run: bool,
    },
    PodProtected {
        node: String,
        pod: String,
        reason: Protection,
    },
    EvictionPlanned {
        node: String,
        pod: String,
    },
    EvictionRequested {
        node: String,
        pod: String,
    },
    EvictionFailed {
        node: String,
        pod: String,
        error: String,
    },
    PodsRemaining {
        node: String,
        remaining: usize,
    },
    DrainCompleted {
        node: String,
        evicted: usize,
        protected: usize,
    },
    RebootPlanned {
        node: String,
        address: String,
        command: String,
    },
    RebootSent {
        node: String,
        address: String,
        connection_dropped: bool,
    },
    RebootConfirmed {
        node: String,
        ticks: u32,
    },
    NodeReady {
        node: String,
        ticks: u32,
    },
    Uncordoned {
        node: String,
        dry_run: bool,
    },
    Warning {
        node: String,
        message: String,
    },
    NodeCompleted {
        node: String,
    },
    NodeFailed {
        node: String,
        error: String,
    },
    RunFinished {
        processed: usize,
        failed: Vec<String>,
    },
}

impl RunEvent {
    /// Node the event belongs to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            RunEvent::RunStarted { .. }
            | RunEvent::NodesExcluded { .. }
            | RunEvent::ExcludeMismatch { .. }
            | RunEvent::InitialDelay { .. }
            | RunEvent::RunFinished { .. } => None,
            RunEvent::NodeStarted { node, .. }
            | RunEvent::PhaseEntered { node, .. }
            | RunEvent::PhasesSkipped { node, .. }
            | RunEvent::AlreadyCordoned { node }
            | RunEvent::Cordoned { node, .. }
            | RunEvent::PodProtected { node, .. }
            | RunEvent::EvictionPlanned { node, .. }
            | RunEvent::EvictionRequested { node, .. }
            | RunEvent::EvictionFailed { node, .. }
            | RunEvent::PodsRemaining { node, .. }
            | RunEvent::DrainCompleted { node, .. }
            | RunEvent::RebootPlanned { node, .. }
            | RunEvent::RebootSent { node, .. }
            | RunEvent::RebootConfirmed { node, .. }
            | RunEvent::NodeReady { node, .. }
            | RunEvent::Uncordoned { node, .. }
            | RunEvent::Warning { node, .. }
            | RunEvent::NodeCompleted { node }
            | RunEvent::NodeFailed { node, .. } => Some(node.as_str()),
        }
    }
}

/// Receives run events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Forwards every event to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::RunStarted { nodes, dry_run } => {
                info!(count = nodes.len(), "Starting node restart run");
                info!("Target nodes:\n    {}", nodes.join("\n    "));
                if dry_run {
                    info!("DRY-RUN mode enabled - no changes will be made");
                }
            }
            RunEvent::NodesExcluded { nodes } => {
                info!(count = nodes.len(), "Excluded nodes:\n    {}", nodes.join("\n    "));
            }
            RunEvent::ExcludeMismatch { missing } => {
                warn!("Exclude nodes not found in target set:\n    {}", missing.join("\n    "));
            }
            RunEvent::InitialDelay { seconds } => {
                info!(seconds, "Initial wait before starting operations");
            }
            RunEvent::NodeStarted { node, address } => {
                info!(node = %node, address = %address, "Starting node restart process");
            }
            RunEvent::PhaseEntered { node, phase } => {
                debug!(node = %node, phase = %phase, "Entering phase");
            }
            RunEvent::PhasesSkipped { node, phases } => {
                let names: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
                info!(node = %node, phases = %names.join(", "), "Skipping phases");
            }
            RunEvent::AlreadyCordoned { node } => {
                info!(node = %node, "Node already cordoned");
            }
            RunEvent::Cordoned { node, dry_run } => {
                if dry_run {
                    info!(node = %node, "DRY-RUN: would cordon node");
                } else {
                    info!(node = %node, "Node cordoned - scheduling disabled");
                }
            }
            RunEvent::PodProtected { node, pod, reason } => {
                debug!(node = %node, pod = %pod, reason = %reason, "Not evicting pod");
            }
            RunEvent::EvictionPlanned { node, pod } => {
                info!(node = %node, pod = %pod, "DRY-RUN: would evict pod");
            }
            RunEvent::EvictionRequested { node, pod } => {
                info!(node = %node, pod = %pod, "Eviction sent for pod");
            }
            RunEvent::EvictionFailed { node, pod, error } => {
                warn!(node = %node, pod = %pod, error = %error, "Failed to evict pod");
            }
            RunEvent::PodsRemaining { node, remaining } => {
                debug!(node = %node, remaining, "Waiting for evicted pods to leave");
            }
            RunEvent::DrainCompleted {
                node,
                evicted,
                protected,
            } => {
                info!(node = %node, evicted, protected, "Pod eviction completed");
            }
            RunEvent::RebootPlanned {
                node,
                address,
                command,
            } => {
                info!(node = %node, "DRY-RUN: would run 'ssh {} {}'", address, command);
            }
            RunEvent::RebootSent {
                node,
                address,
                connection_dropped,
            } => {
                info!(node = %node, address = %address, connection_dropped, "Reboot command sent");
            }
            RunEvent::RebootConfirmed { node, ticks } => {
                info!(node = %node, polls = ticks, "Reboot confirmed - boot ID changed");
            }
            RunEvent::NodeReady { node, ticks } => {
                info!(node = %node, polls = ticks, "Node is ready");
            }
            RunEvent::Uncordoned { node, dry_run } => {
                if dry_run {
                    info!(node = %node, "DRY-RUN: would uncordon node");
                } else {
                    info!(node = %node, "Node uncordoned - scheduling enabled");
                }
            }
            RunEvent::Warning { node, message } => {
                warn!(node = %node, "{}", message);
            }
            RunEvent::NodeCompleted { node } => {
                info!(node = %node, "Node restart process completed successfully");
            }
            RunEvent::NodeFailed { node, error } => {
                error!(node = %node, error = %error, "Node processing failed");
            }
            RunEvent::RunFinished { processed, failed } => {
                if failed.is_empty() {
                    info!(processed, "All nodes processed successfully");
                } else {
                    error!(
                        processed,
                        failed_count = failed.len(),
                        "Operation failed for:\n    {}",
                        failed.join("\n    ")
                    );
                }
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events belonging to one node
    pub fn events_for(&self, node: &str) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.node() == Some(node))
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
