//! Pod eviction for a node being drained
//!
//! Draining is done client side: every pod on the node is classified as
//! protected or evictable, evictable pods get an eviction request, and the
//! node is then re-listed until no evictable pod remains. Success is judged
//! by re-listing rather than by eviction responses, so pods that were already
//! leaving, or that fail to evict but are deleted by other means, still count.
//!
//! Protected pods are left alone:
//! - Mirror pods: static manifests owned by the kubelet
//! - DaemonSet pods: the controller ignores cordons and recreates them
//! - Critical pods in `kube-system`
//! - Pods that already have a deletion timestamp

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::cluster::{
    ClusterApi, ClusterError, PodRecord, CRITICAL_POD_ANNOTATION, DAEMONSET_KIND,
    MIRROR_POD_ANNOTATION, SYSTEM_NAMESPACE,
};
use crate::events::{EventSink, RunEvent};
use crate::wait::deadline_after;

/// Why a pod is not evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    MirrorPod,
    DaemonSet,
    CriticalSystemPod,
    Terminating,
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Protection::MirrorPod => "static mirror pod",
            Protection::DaemonSet => "member of a DaemonSet",
            Protection::CriticalSystemPod => "critical system pod",
            Protection::Terminating => "already terminating",
        };
        f.write_str(reason)
    }
}

/// Errors that end a drain
#[derive(Error, Debug)]
pub enum DrainError {
    #[error("listing pods on node '{node}' failed: {source}")]
    List {
        node: String,
        #[source]
        source: ClusterError,
    },

    #[error("timeout waiting for pods eviction on {node} ({remaining} pods remaining)")]
    Timeout {
        node: String,
        remaining: usize,
        timeout: Duration,
    },
}

/// Knobs for a single drain
#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub grace_period_secs: u32,
    pub dry_run: bool,
}

/// What a drain did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Pods left alone because they are protected
    pub protected: usize,
    /// Eviction requests accepted
    pub requested: usize,
    /// Eviction requests that failed
    pub failed: usize,
    /// Evictions skipped because of dry-run
    pub planned: usize,
}

impl DrainReport {
    /// Pods evicted, or that would have been in dry-run
    pub fn evicted(&self) -> usize {
        self.requested + self.planned
    }

    fn completed(&self, node: &str) -> RunEvent {
        RunEvent::DrainCompleted {
            node: node.to_string(),
            evicted: self.evicted(),
            protected: self.protected,
        }
    }
}

// ============================================================================
// SBIO: Pure classification (no I/O)
// ============================================================================

/// Classify a pod. `None` means the pod is evictable.
pub fn protection(pod: &PodRecord) -> Option<Protection> {
    if pod.has_annotation(MIRROR_POD_ANNOTATION) {
        Some(Protection::MirrorPod)
    } else if pod.has_owner_kind(DAEMONSET_KIND) {
        Some(Protection::DaemonSet)
    } else if pod.namespace == SYSTEM_NAMESPACE && is_critical(pod) {
        Some(Protection::CriticalSystemPod)
    } else if pod.deletion_requested {
        Some(Protection::Terminating)
    } else {
        None
    }
}

fn is_critical(pod: &PodRecord) -> bool {
    pod.has_annotation(CRITICAL_POD_ANNOTATION) || pod.has_annotation(MIRROR_POD_ANNOTATION)
}

pub fn is_protected(pod: &PodRecord) -> bool {
    protection(pod).is_some()
}

/// Number of pods that still need to leave the node
pub fn evictable_count(pods: &[PodRecord]) -> usize {
    pods.iter().filter(|p| !is_protected(p)).count()
}

// ============================================================================
// Controller
// ============================================================================

/// Evicts pods from a node and waits for them to go
pub struct EvictionController<'a> {
    cluster: &'a dyn ClusterApi,
    events: &'a dyn EventSink,
}

impl<'a> EvictionController<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, events: &'a dyn EventSink) -> Self {
        Self { cluster, events }
    }

    /// Evict every evictable pod on `node` and wait until none remain.
    ///
    /// In dry-run the node is listed and classified, intended evictions are
    /// reported, and the drain returns without waiting.
    pub async fn drain(
        &self,
        node: &str,
        settings: &DrainSettings,
    ) -> Result<DrainReport, DrainError> {
        let pods = self.list(node).await?;
        let mut report = DrainReport::default();

        for pod in &pods {
            if let Some(reason) = protection(pod) {
                report.protected += 1;
                self.events.emit(RunEvent::PodProtected {
                    node: node.to_string(),
                    pod: pod.qualified_name(),
                    reason,
                });
                continue;
            }

            if settings.dry_run {
                report.planned += 1;
                self.events.emit(RunEvent::EvictionPlanned {
                    node: node.to_string(),
                    pod: pod.qualified_name(),
                });
                continue;
            }

            match self
                .cluster
                .evict_pod(&pod.namespace, &pod.name, settings.grace_period_secs)
                .await
            {
                Ok(()) => {
                    report.requested += 1;
                    self.events.emit(RunEvent::EvictionRequested {
                        node: node.to_string(),
                        pod: pod.qualified_name(),
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    self.events.emit(RunEvent::EvictionFailed {
                        node: node.to_string(),
                        pod: pod.qualified_name(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if settings.dry_run || evictable_count(&pods) == 0 {
            self.events.emit(report.completed(node));
            return Ok(report);
        }

        let deadline = deadline_after(settings.timeout);
        let mut remaining = evictable_count(&pods);
        while Instant::now() < deadline {
            let left = self.list(node).await?;
            remaining = evictable_count(&left);
            if remaining == 0 {
                self.events.emit(report.completed(node));
                return Ok(report);
            }
            self.events.emit(RunEvent::PodsRemaining {
                node: node.to_string(),
                remaining,
            });
            sleep(settings.poll_interval).await;
        }

        Err(DrainError::Timeout {
            node: node.to_string(),
            remaining,
            timeout: settings.timeout,
        })
    }

    async fn list(&self, node: &str) -> Result<Vec<PodRecord>, DrainError> {
        self.cluster
            .list_pods_on_node(node)
            .await
            .map_err(|source| DrainError::List {
                node: node.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterCall, EvictionBehavior, InMemoryCluster, MemoryNode};
    use crate::events::MemorySink;

    fn settings(dry_run: bool) -> DrainSettings {
        DrainSettings {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            grace_period_secs: 30,
            dry_run,
        }
    }

    fn cluster_with(pods: Vec<PodRecord>) -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("node-1"));
        for pod in pods {
            cluster.place_pod("node-1", pod);
        }
        cluster
    }

    #[test]
    fn test_mirror_pod_is_protected() {
        let pod = PodRecord::new("default", "etcd").with_annotation(MIRROR_POD_ANNOTATION, "hash");
        assert_eq!(protection(&pod), Some(Protection::MirrorPod));
    }

    #[test]
    fn test_daemonset_pod_is_protected() {
        let pod = PodRecord::new("monitoring", "node-exporter-x").owned_by(DAEMONSET_KIND);
        assert_eq!(protection(&pod), Some(Protection::DaemonSet));

        let pod = PodRecord::new("default", "web-1").owned_by("ReplicaSet");
        assert_eq!(protection(&pod), None);
    }

    #[test]
    fn test_critical_pod_only_protected_in_system_namespace() {
        let critical = PodRecord::new(SYSTEM_NAMESPACE, "coredns")
            .with_annotation(CRITICAL_POD_ANNOTATION, "true");
        assert_eq!(protection(&critical), Some(Protection::CriticalSystemPod));

        let elsewhere =
            PodRecord::new("default", "coredns").with_annotation(CRITICAL_POD_ANNOTATION, "true");
        assert_eq!(protection(&elsewhere), None);

        let plain_system = PodRecord::new(SYSTEM_NAMESPACE, "metrics-server");
        assert_eq!(protection(&plain_system), None);
    }

    #[test]
    fn test_terminating_pod_is_protected() {
        let pod = PodRecord::new("default", "web").terminating();
        assert_eq!(protection(&pod), Some(Protection::Terminating));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let pods = vec![
            PodRecord::new("default", "web"),
            PodRecord::new("default", "ds").owned_by(DAEMONSET_KIND),
            PodRecord::new(SYSTEM_NAMESPACE, "api").with_annotation(MIRROR_POD_ANNOTATION, "x"),
            PodRecord::new("default", "old").terminating(),
        ];
        let first: Vec<_> = pods.iter().map(protection).collect();
        let relisted = pods.clone();
        let second: Vec<_> = relisted.iter().map(protection).collect();

        assert_eq!(first, second);
        assert_eq!(evictable_count(&pods), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_daemonset_only_node_succeeds_immediately() {
        let cluster =
            cluster_with(vec![PodRecord::new("kube-system", "cilium-abc").owned_by(DAEMONSET_KIND)]);
        let sink = MemorySink::new();
        let controller = EvictionController::new(&cluster, &sink);

        let start = Instant::now();
        let report = controller.drain("node-1", &settings(false)).await.unwrap();

        assert_eq!(report.protected, 1);
        assert_eq!(report.requested, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(cluster.calls(), vec![ClusterCall::ListPods("node-1".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_plain_pods_and_waits_for_them() {
        let cluster = cluster_with(vec![
            PodRecord::new("default", "web-1"),
            PodRecord::new("default", "web-2"),
            PodRecord::new("default", "agent").owned_by(DAEMONSET_KIND),
        ]);
        let sink = MemorySink::new();
        let controller = EvictionController::new(&cluster, &sink);

        let report = controller.drain("node-1", &settings(false)).await.unwrap();

        assert_eq!(report.requested, 2);
        assert_eq!(report.protected, 1);
        assert_eq!(cluster.pods_on("node-1").len(), 1);
        assert!(cluster.calls().contains(&ClusterCall::EvictPod {
            namespace: "default".to_string(),
            name: "web-1".to_string(),
            grace_period_secs: 30,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminating_pods_count_as_drained() {
        let cluster = InMemoryCluster::new().with_eviction(EvictionBehavior::Terminate);
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "web"));
        let sink = MemorySink::new();

        let report = EvictionController::new(&cluster, &sink)
            .drain("node-1", &settings(false))
            .await
            .unwrap();

        assert_eq!(report.requested, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_eviction_times_out() {
        let cluster = InMemoryCluster::new().with_eviction(EvictionBehavior::Ignore);
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "stubborn"));
        let sink = MemorySink::new();

        let result = EvictionController::new(&cluster, &sink)
            .drain("node-1", &settings(false))
            .await;

        match result {
            Err(DrainError::Timeout { node, remaining, .. }) => {
                assert_eq!(node, "node-1");
                assert_eq!(remaining, 1);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_eviction_does_not_abort_phase() {
        let cluster = InMemoryCluster::new().with_eviction(EvictionBehavior::Reject);
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "guarded"));
        cluster.place_pod("node-1", PodRecord::new("default", "other"));
        let sink = MemorySink::new();

        let mut fast = settings(false);
        fast.timeout = Duration::from_secs(10);
        let result = EvictionController::new(&cluster, &sink)
            .drain("node-1", &fast)
            .await;

        let failures = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::EvictionFailed { .. }))
            .count();
        assert_eq!(failures, 2);
        assert!(matches!(result, Err(DrainError::Timeout { remaining: 2, .. })));
    }

    #[tokio::test]
    async fn test_dry_run_lists_but_never_evicts() {
        let cluster = cluster_with(vec![
            PodRecord::new("default", "web-1"),
            PodRecord::new("default", "agent").owned_by(DAEMONSET_KIND),
        ]);
        let sink = MemorySink::new();

        let report = EvictionController::new(&cluster, &sink)
            .drain("node-1", &settings(true))
            .await
            .unwrap();

        assert_eq!(report.planned, 1);
        assert_eq!(report.evicted(), 1);
        assert!(cluster.mutating_calls().is_empty());
        assert!(sink.events().contains(&RunEvent::EvictionPlanned {
            node: "node-1".to_string(),
            pod: "default/web-1".to_string(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_event_carries_counts() {
        let cluster = cluster_with(vec![
            PodRecord::new("default", "web-1"),
            PodRecord::new("default", "web-2"),
            PodRecord::new("default", "agent").owned_by(DAEMONSET_KIND),
        ]);
        let sink = MemorySink::new();

        EvictionController::new(&cluster, &sink)
            .drain("node-1", &settings(false))
            .await
            .unwrap();

        assert_eq!(
            sink.events().last(),
            Some(&RunEvent::DrainCompleted {
                node: "node-1".to_string(),
                evicted: 2,
                protected: 1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_drain_timeout_does_not_overflow() {
        let cluster = cluster_with(vec![PodRecord::new("default", "web-1")]);
        let sink = MemorySink::new();

        let mut unbounded = settings(false);
        unbounded.timeout = Duration::from_secs(u64::MAX);
        let report = EvictionController::new(&cluster, &sink)
            .drain("node-1", &unbounded)
            .await
            .unwrap();

        assert_eq!(report.requested, 1);
        assert!(cluster.pods_on("node-1").is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let cluster = InMemoryCluster::new();
        let sink = MemorySink::new();

        let result = EvictionController::new(&cluster, &sink)
            .drain("ghost", &settings(false))
            .await;

        assert!(matches!(result, Err(DrainError::List { .. })));
    }
}
