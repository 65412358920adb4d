//! Node lifecycle orchestration
//!
//! [`NodeLifecycle`] drives one node through the reboot cycle:
//!
//! ```text
//! Start → Cordoning → Draining → Rebooting → VerifyingReboot → VerifyingReady → Uncordoning → Done
//!                                                                                  any phase ↘ Failed
//! ```
//!
//! Every phase has an entry action that talks to the cluster or the remote
//! shell and reports a [`PhaseEvent`]; [`transition`] turns that into the next
//! state. The orchestrator never returns an error: whatever happens ends up in
//! the [`NodeOutcome`].

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::RunConfig;
use crate::drain::{DrainError, DrainSettings, EvictionController};
use crate::events::{EventSink, RunEvent};
use crate::remote::{NodeTarget, RemoteExec, RemoteOutcome};
use crate::wait::{boot_id_changed, is_node_ready, ConditionWaiter, WaitOutcome};

mod machine;

pub use machine::{transition, NodeState, PhaseEvent, StepOutcome, Transition, TransitionPolicy};

/// Why a node ended in [`NodeState::Failed`]
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{phase} failed: {source}")]
    Cluster {
        phase: NodeState,
        #[source]
        source: ClusterError,
    },

    #[error("timed out in {phase} on node {node} after {}s", .timeout.as_secs())]
    Timeout {
        phase: NodeState,
        node: String,
        timeout: Duration,
    },

    #[error("event '{event}' is not valid in {phase}")]
    InvalidTransition {
        phase: NodeState,
        event: &'static str,
    },
}

impl LifecycleError {
    /// Phase the failure happened in
    pub fn phase(&self) -> NodeState {
        match self {
            LifecycleError::Cluster { phase, .. }
            | LifecycleError::Timeout { phase, .. }
            | LifecycleError::InvalidTransition { phase, .. } => *phase,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LifecycleError::Timeout { .. })
    }
}

impl From<DrainError> for LifecycleError {
    fn from(err: DrainError) -> Self {
        match err {
            DrainError::List { source, .. } => LifecycleError::Cluster {
                phase: NodeState::Draining,
                source,
            },
            DrainError::Timeout { node, timeout, .. } => LifecycleError::Timeout {
                phase: NodeState::Draining,
                node,
                timeout,
            },
        }
    }
}

/// Terminal record for one node
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: String,
    pub state: NodeState,
    pub error: Option<LifecycleError>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        self.state == NodeState::Done
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Facts carried between phases
#[derive(Debug, Default)]
struct NodeFacts {
    /// Boot ID captured before the reboot; empty when unknown
    boot_id: String,
    already_cordoned: bool,
    /// Warnings raised by entry actions, not yet collected
    warnings: Vec<String>,
}

/// Drives a single node through the reboot cycle
pub struct NodeLifecycle<'a> {
    cluster: &'a dyn ClusterApi,
    remote: &'a dyn RemoteExec,
    config: &'a RunConfig,
    events: &'a dyn EventSink,
}

impl<'a> NodeLifecycle<'a> {
    pub fn new(
        cluster: &'a dyn ClusterApi,
        remote: &'a dyn RemoteExec,
        config: &'a RunConfig,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            cluster,
            remote,
            config,
            events,
        }
    }

    /// Run the full cycle for `target` and report how it ended
    pub async fn run(&self, target: &NodeTarget) -> NodeOutcome {
        let started_at = Utc::now();
        let node = target.node.clone();
        self.events.emit(RunEvent::NodeStarted {
            node: node.clone(),
            address: target.address.clone(),
        });

        let mut facts = NodeFacts::default();
        let mut state = NodeState::Start;
        let mut warnings = Vec::new();
        let mut error = None;

        while !state.is_terminal() {
            self.events.emit(RunEvent::PhaseEntered {
                node: node.clone(),
                phase: state,
            });

            let event = self.enter(state, target, &mut facts).await;
            warnings.append(&mut facts.warnings);
            let policy = TransitionPolicy {
                dry_run: self.config.dry_run,
                reboot_verification_required: self.config.reboot_verification_required,
                boot_id_known: !facts.boot_id.is_empty(),
            };
            let step = transition(state, event, &policy);

            if !step.skipped.is_empty() {
                self.events.emit(RunEvent::PhasesSkipped {
                    node: node.clone(),
                    phases: step.skipped.clone(),
                });
            }
            match step.outcome {
                StepOutcome::Continue => {}
                StepOutcome::Warn(message) => {
                    self.events.emit(RunEvent::Warning {
                        node: node.clone(),
                        message: message.clone(),
                    });
                    warnings.push(message);
                }
                StepOutcome::Fail(e) => error = Some(e),
            }
            state = step.next;
        }

        match &error {
            None => self.events.emit(RunEvent::NodeCompleted { node: node.clone() }),
            Some(e) => self.events.emit(RunEvent::NodeFailed {
                node: node.clone(),
                error: e.to_string(),
            }),
        }

        NodeOutcome {
            node,
            state,
            error,
            warnings,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Entry action of `state`
    async fn enter(
        &self,
        state: NodeState,
        target: &NodeTarget,
        facts: &mut NodeFacts,
    ) -> PhaseEvent {
        let node = target.node.as_str();
        match state {
            NodeState::Start => self.inspect(node, facts).await,
            NodeState::Cordoning => self.cordon(node, facts).await,
            NodeState::Draining => self.drain(node).await,
            NodeState::Rebooting => self.reboot(target).await,
            NodeState::VerifyingReboot => self.verify_reboot(node, &facts.boot_id).await,
            NodeState::VerifyingReady => self.verify_ready(node).await,
            NodeState::Uncordoning => self.uncordon(node).await,
            NodeState::Done | NodeState::Failed => PhaseEvent::Completed,
        }
    }

    async fn inspect(&self, node: &str, facts: &mut NodeFacts) -> PhaseEvent {
        let record = match self.cluster.get_node(node).await {
            Ok(record) => record,
            Err(source) => {
                return PhaseEvent::Failed(LifecycleError::Cluster {
                    phase: NodeState::Start,
                    source,
                })
            }
        };

        if record.boot_id.is_empty() {
            let message = "boot ID not reported, reboot cannot be verified".to_string();
            self.events.emit(RunEvent::Warning {
                node: node.to_string(),
                message: message.clone(),
            });
            facts.warnings.push(message);
        }
        facts.boot_id = record.boot_id;
        facts.already_cordoned = record.unschedulable;
        PhaseEvent::Completed
    }

    async fn cordon(&self, node: &str, facts: &NodeFacts) -> PhaseEvent {
        if facts.already_cordoned {
            self.events.emit(RunEvent::AlreadyCordoned {
                node: node.to_string(),
            });
            return PhaseEvent::Completed;
        }
        self.set_schedulable(node, false, NodeState::Cordoning).await
    }

    async fn uncordon(&self, node: &str) -> PhaseEvent {
        self.set_schedulable(node, true, NodeState::Uncordoning).await
    }

    async fn set_schedulable(&self, node: &str, schedulable: bool, phase: NodeState) -> PhaseEvent {
        let dry_run = self.config.dry_run;
        if !dry_run {
            if let Err(source) = self.cluster.set_unschedulable(node, !schedulable).await {
                return PhaseEvent::Failed(LifecycleError::Cluster { phase, source });
            }
        }

        let node = node.to_string();
        self.events.emit(if schedulable {
            RunEvent::Uncordoned { node, dry_run }
        } else {
            RunEvent::Cordoned { node, dry_run }
        });
        PhaseEvent::Completed
    }

    async fn drain(&self, node: &str) -> PhaseEvent {
        let settings = DrainSettings {
            poll_interval: self.config.poll_interval,
            timeout: self.config.drain_timeout,
            grace_period_secs: self.config.grace_period_secs,
            dry_run: self.config.dry_run,
        };
        match EvictionController::new(self.cluster, self.events)
            .drain(node, &settings)
            .await
        {
            Ok(_) => PhaseEvent::Completed,
            Err(e) => PhaseEvent::Failed(e.into()),
        }
    }

    async fn reboot(&self, target: &NodeTarget) -> PhaseEvent {
        let command = &self.config.reboot_command;
        if self.config.dry_run {
            self.events.emit(RunEvent::RebootPlanned {
                node: target.node.clone(),
                address: target.address.clone(),
                command: command.clone(),
            });
            return PhaseEvent::Completed;
        }

        match self.remote.run(&target.address, command).await {
            Ok(outcome) => {
                self.events.emit(RunEvent::RebootSent {
                    node: target.node.clone(),
                    address: target.address.clone(),
                    connection_dropped: outcome == RemoteOutcome::ConnectionDropped,
                });
                PhaseEvent::Completed
            }
            Err(e) => PhaseEvent::RebootCommandFailed(format!("reboot command failed: {}", e)),
        }
    }

    async fn verify_reboot(&self, node: &str, before: &str) -> PhaseEvent {
        let waiter = ConditionWaiter::new(
            self.cluster,
            self.config.poll_interval,
            self.config.boot_id_timeout,
        );
        match waiter.wait_until(node, boot_id_changed(before)).await {
            WaitOutcome::Satisfied { ticks } => {
                self.events.emit(RunEvent::RebootConfirmed {
                    node: node.to_string(),
                    ticks,
                });
                PhaseEvent::Completed
            }
            WaitOutcome::Expired { .. } => PhaseEvent::BootIdUnchanged {
                node: node.to_string(),
                timeout: waiter.timeout(),
            },
        }
    }

    async fn verify_ready(&self, node: &str) -> PhaseEvent {
        let waiter = ConditionWaiter::new(
            self.cluster,
            self.config.poll_interval,
            self.config.ready_timeout,
        );
        match waiter.wait_until(node, is_node_ready).await {
            WaitOutcome::Satisfied { ticks } => {
                self.events.emit(RunEvent::NodeReady {
                    node: node.to_string(),
                    ticks,
                });
                PhaseEvent::Completed
            }
            WaitOutcome::Expired { .. } => PhaseEvent::Failed(LifecycleError::Timeout {
                phase: NodeState::VerifyingReady,
                node: node.to_string(),
                timeout: waiter.timeout(),
            }),
        }
    }
}
