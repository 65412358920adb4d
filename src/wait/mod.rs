//! Bounded polling against node state
//!
//! [`ConditionWaiter`] re-fetches a node every interval and evaluates a
//! predicate until it holds or the deadline passes. A failed fetch counts as
//! "not yet" and is retried on the next tick; only deadline expiry is
//! reported back.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::cluster::{ClusterApi, NodeRecord, READY_CONDITION};

/// Stand-in deadline for timeouts too large to add to the clock (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline `timeout` from now, saturating at [`FAR_FUTURE`]
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Predicate held on the given poll (1-based)
    Satisfied { ticks: u32 },
    /// Deadline passed after the given number of polls
    Expired { ticks: u32 },
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied { .. })
    }

    pub fn ticks(&self) -> u32 {
        match self {
            WaitOutcome::Satisfied { ticks } | WaitOutcome::Expired { ticks } => *ticks,
        }
    }
}

/// Polls a node until a predicate holds or a timeout elapses
pub struct ConditionWaiter<'a> {
    cluster: &'a dyn ClusterApi,
    interval: Duration,
    timeout: Duration,
}

impl<'a> ConditionWaiter<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, interval: Duration, timeout: Duration) -> Self {
        Self {
            cluster,
            interval,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `node` until `predicate` returns true or the deadline passes
    pub async fn wait_until<P>(&self, node: &str, predicate: P) -> WaitOutcome
    where
        P: Fn(&NodeRecord) -> bool,
    {
        let deadline = deadline_after(self.timeout);
        let mut ticks = 0u32;

        while Instant::now() < deadline {
            ticks += 1;
            match self.cluster.get_node(node).await {
                Ok(record) if predicate(&record) => return WaitOutcome::Satisfied { ticks },
                Ok(_) => trace!(node = %node, tick = ticks, "Condition not yet met"),
                Err(e) => debug!(node = %node, tick = ticks, error = %e, "Node fetch failed, retrying"),
            }
            sleep(self.interval).await;
        }

        WaitOutcome::Expired { ticks }
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// Boot ID is known and differs from the one captured before the reboot
pub fn boot_id_changed(before: &str) -> impl Fn(&NodeRecord) -> bool + '_ {
    move |node: &NodeRecord| !node.boot_id.is_empty() && node.boot_id != before
}

/// The `Ready` condition is present and `True`; other conditions are ignored
pub fn is_node_ready(node: &NodeRecord) -> bool {
    node.condition(READY_CONDITION)
        .is_some_and(|c| c.is_true())
}
