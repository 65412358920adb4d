//! Run coordination
//!
//! Resolves the target node set, applies exclusions, then hands each node to
//! [`NodeLifecycle`] one at a time. A failed node is recorded and the run moves
//! on; only the final [`RunResult`] decides the exit status.

use thiserror::Error;
use tokio::time::sleep;

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::{read_nodes_file, ConfigError, RunConfig};
use crate::events::{EventSink, RunEvent};
use crate::lifecycle::{NodeLifecycle, NodeOutcome};
use crate::remote::{NodeTarget, RemoteExec};

/// Failures that stop a run before any node is touched
#[derive(Error, Debug)]
pub enum RunError {
    #[error("No nodes specified: pass node names, --file, or --all")]
    NoNodes,

    #[error("All {count} target nodes were excluded - no nodes to process")]
    AllExcluded { count: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to list cluster nodes: {0}")]
    ListNodes(#[source] ClusterError),
}

/// Result of subtracting the exclusion list from the target list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionReport {
    /// Targets that survive, original order and duplicates kept
    pub kept: Vec<String>,
    /// Excluded names that matched a target
    pub excluded: Vec<String>,
    /// Excluded names that matched nothing
    pub missing: Vec<String>,
}

/// Remove every excluded name from `nodes`
pub fn apply_exclusions(nodes: &[String], exclude: &[String]) -> ExclusionReport {
    let mut report = ExclusionReport {
        kept: nodes
            .iter()
            .filter(|n| !exclude.contains(*n))
            .cloned()
            .collect(),
        ..Default::default()
    };

    for name in exclude {
        let bucket = if nodes.contains(name) {
            &mut report.excluded
        } else {
            &mut report.missing
        };
        if !bucket.contains(name) {
            bucket.push(name.clone());
        }
    }
    report
}

/// Aggregate of a whole run
#[derive(Debug, Default)]
pub struct RunResult {
    pub processed: usize,
    /// Nodes that ended in a failed state, in processing order
    pub failed: Vec<String>,
    pub outcomes: Vec<NodeOutcome>,
}

impl RunResult {
    fn record(&mut self, outcome: NodeOutcome) {
        self.processed += 1;
        if !outcome.is_success() {
            self.failed.push(outcome.node.clone());
        }
        self.outcomes.push(outcome);
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit status: 0 when every node succeeded, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Runs the reboot cycle across all target nodes
pub struct RunCoordinator<'a> {
    cluster: &'a dyn ClusterApi,
    remote: &'a dyn RemoteExec,
    config: &'a RunConfig,
    events: &'a dyn EventSink,
}

impl<'a> RunCoordinator<'a> {
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

    /// Node names from the first configured source: explicit names, then
    /// the node file, then every node in the cluster
    pub async fn resolve_nodes(&self) -> Result<Vec<String>, RunError> {
        let nodes = if !self.config.nodes.is_empty() {
            self.config.nodes.clone()
        } else if let Some(path) = &self.config.nodes_file {
            read_nodes_file(path)?
        } else if self.config.all_nodes {
            self.cluster
                .list_nodes(self.config.exclude_control_plane)
                .await
                .map_err(RunError::ListNodes)?
        } else {
            Vec::new()
        };

        if nodes.is_empty() {
            return Err(RunError::NoNodes);
        }
        Ok(nodes)
    }

    /// Resolve targets and apply exclusions
    pub async fn targets(&self) -> Result<Vec<NodeTarget>, RunError> {
        let nodes = self.resolve_nodes().await?;

        let nodes = if self.config.exclude_nodes.is_empty() {
            nodes
        } else {
            let report = apply_exclusions(&nodes, &self.config.exclude_nodes);
            if !report.excluded.is_empty() {
                self.events.emit(RunEvent::NodesExcluded {
                    nodes: report.excluded.clone(),
                });
            }
            if !report.missing.is_empty() {
                self.events.emit(RunEvent::ExcludeMismatch {
                    missing: report.missing.clone(),
                });
            }
            if report.kept.is_empty() {
                return Err(RunError::AllExcluded { count: nodes.len() });
            }
            report.kept
        };

        Ok(nodes
            .iter()
            .map(|node| NodeTarget::resolve(node, &self.config.ssh))
            .collect())
    }

    /// Process every target node in order
    pub async fn run(&self) -> Result<RunResult, RunError> {
        let targets = self.targets().await?;

        self.events.emit(RunEvent::RunStarted {
            nodes: targets.iter().map(|t| t.node.clone()).collect(),
            dry_run: self.config.dry_run,
        });

        if !self.config.initial_delay.is_zero() {
            self.events.emit(RunEvent::InitialDelay {
                seconds: self.config.initial_delay.as_secs(),
            });
            sleep(self.config.initial_delay).await;
        }

        let lifecycle = NodeLifecycle::new(self.cluster, self.remote, self.config, self.events);
        let mut result = RunResult::default();
        for target in &targets {
            result.record(lifecycle.run(target).await);
        }

        self.events.emit(RunEvent::RunFinished {
            processed: result.processed,
            failed: result.failed.clone(),
        });
        Ok(result)
    }
}
