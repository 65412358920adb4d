//! Per-node state machine
//!
//! SBIO pattern: the transition function is pure. Entry actions run in
//! [`NodeLifecycle`](super::NodeLifecycle) and report a [`PhaseEvent`]; the
//! next state is decided here from that event and a [`TransitionPolicy`].

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::LifecycleError;

/// Phase of a node's reboot cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Start,
    Cordoning,
    Draining,
    Rebooting,
    VerifyingReboot,
    VerifyingReady,
    Uncordoning,
    Done,
    Failed,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Start => "start",
            NodeState::Cordoning => "cordoning",
            NodeState::Draining => "draining",
            NodeState::Rebooting => "rebooting",
            NodeState::VerifyingReboot => "verifying-reboot",
            NodeState::VerifyingReady => "verifying-ready",
            NodeState::Uncordoning => "uncordoning",
            NodeState::Done => "done",
            NodeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a phase's entry action
#[derive(Debug)]
pub enum PhaseEvent {
    Completed,
    /// The reboot command could not be delivered
    RebootCommandFailed(String),
    /// The boot ID did not change before the deadline
    BootIdUnchanged { node: String, timeout: Duration },
    Failed(LifecycleError),
}

impl PhaseEvent {
    fn name(&self) -> &'static str {
        match self {
            PhaseEvent::Completed => "completed",
            PhaseEvent::RebootCommandFailed(_) => "reboot-command-failed",
            PhaseEvent::BootIdUnchanged { .. } => "boot-id-unchanged",
            PhaseEvent::Failed(_) => "failed",
        }
    }
}

/// Run-wide switches that shape the path through the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub dry_run: bool,
    pub reboot_verification_required: bool,
    /// A boot ID was captured before the reboot
    pub boot_id_known: bool,
}

/// What the caller should do with a transition besides moving on
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    Warn(String),
    Fail(LifecycleError),
}

#[derive(Debug)]
pub struct Transition {
    pub next: NodeState,
    pub outcome: StepOutcome,
    /// Phases bypassed on the way to `next`
    pub skipped: Vec<NodeState>,
}

impl Transition {
    fn to(next: NodeState) -> Self {
        Self {
            next,
            outcome: StepOutcome::Continue,
            skipped: Vec::new(),
        }
    }

    fn fail(error: LifecycleError) -> Self {
        Self {
            next: NodeState::Failed,
            outcome: StepOutcome::Fail(error),
            skipped: Vec::new(),
        }
    }

    fn skipping(mut self, phases: &[NodeState]) -> Self {
        self.skipped = phases.to_vec();
        self
    }

    fn warn(mut self, message: String) -> Self {
        self.outcome = StepOutcome::Warn(message);
        self
    }
}

/// Decide the next state after `state`'s entry action reported `event`
pub fn transition(state: NodeState, event: PhaseEvent, policy: &TransitionPolicy) -> Transition {
    use NodeState::*;

    match (state, event) {
        (Done | Failed, event) => Transition::fail(LifecycleError::InvalidTransition {
            phase: state,
            event: event.name(),
        }),

        (_, PhaseEvent::Failed(error)) => Transition::fail(error),

        (Start, PhaseEvent::Completed) => Transition::to(Cordoning),
        (Cordoning, PhaseEvent::Completed) => Transition::to(Draining),
        (Draining, PhaseEvent::Completed) => Transition::to(Rebooting),

        (Rebooting, PhaseEvent::Completed) => after_reboot(policy),
        (Rebooting, PhaseEvent::RebootCommandFailed(reason)) => after_reboot(policy).warn(reason),

        (VerifyingReboot, PhaseEvent::Completed) => Transition::to(VerifyingReady),
        (VerifyingReboot, PhaseEvent::BootIdUnchanged { node, timeout }) => {
            if policy.reboot_verification_required {
                Transition::fail(LifecycleError::Timeout {
                    phase: VerifyingReboot,
                    node,
                    timeout,
                })
            } else {
                Transition::to(VerifyingReady).warn(format!(
                    "boot ID of {} unchanged after {}s, continuing without reboot confirmation",
                    node,
                    timeout.as_secs()
                ))
            }
        }

        (VerifyingReady, PhaseEvent::Completed) => Transition::to(Uncordoning),
        (Uncordoning, PhaseEvent::Completed) => Transition::to(Done),

        (state, event) => Transition::fail(LifecycleError::InvalidTransition {
            phase: state,
            event: event.name(),
        }),
    }
}

fn after_reboot(policy: &TransitionPolicy) -> Transition {
    use NodeState::*;

    if policy.dry_run {
        Transition::to(Uncordoning).skipping(&[VerifyingReboot, VerifyingReady])
    } else if !policy.boot_id_known {
        Transition::to(VerifyingReady).skipping(&[VerifyingReboot])
    } else {
        Transition::to(VerifyingReboot)
    }
}
