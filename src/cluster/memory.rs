//! In-memory cluster - a test backend implementing [`ClusterApi`]
//!
//! Stands in for the API server when exercising the reboot workflow in unit
//! and integration tests.
//! Each node carries scripted boot ID and readiness sequences: every
//! `get_node` call observes the front of each sequence and then advances it,
//! except that the last entry sticks once reached. All calls are recorded in a
//! journal so callers can assert which operations reached the cluster.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ClusterApi, ClusterError, NodeRecord, PodRecord, READY_CONDITION};

/// A call that reached the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    ListNodes { exclude_control_plane: bool },
    GetNode(String),
    SetUnschedulable(String, bool),
    ListPods(String),
    EvictPod {
        namespace: String,
        name: String,
        grace_period_secs: u32,
    },
}

impl ClusterCall {
    /// Whether the call changes cluster state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ClusterCall::SetUnschedulable(..) | ClusterCall::EvictPod { .. }
        )
    }
}

/// How the cluster reacts to eviction requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionBehavior {
    /// Pod disappears immediately
    #[default]
    Remove,
    /// Pod stays but gets a deletion timestamp
    Terminate,
    /// Request is accepted but nothing happens (stuck eviction)
    Ignore,
    /// Request fails (e.g. blocked by a disruption budget)
    Reject,
}

/// Scripted state of one node
#[derive(Debug, Clone)]
pub struct MemoryNode {
    name: String,
    unschedulable: bool,
    control_plane: bool,
    boot_ids: VecDeque<String>,
    readiness: VecDeque<bool>,
    failing_reads: u32,
    reject_patches: bool,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unschedulable: false,
            control_plane: false,
            boot_ids: VecDeque::from(vec![String::new()]),
            readiness: VecDeque::from(vec![true]),
            failing_reads: 0,
            reject_patches: false,
        }
    }

    pub fn cordoned(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    pub fn control_plane(mut self) -> Self {
        self.control_plane = true;
        self
    }

    /// Boot IDs observed by successive reads; the last one sticks
    pub fn boot_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boot_ids = ids.into_iter().map(Into::into).collect();
        if self.boot_ids.is_empty() {
            self.boot_ids.push_back(String::new());
        }
        self
    }

    /// Ready condition observed by successive reads; the last one sticks
    pub fn readiness<I>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        self.readiness = states.into_iter().collect();
        if self.readiness.is_empty() {
            self.readiness.push_back(false);
        }
        self
    }

    /// The next `count` reads of this node fail
    pub fn failing_reads(mut self, count: u32) -> Self {
        self.failing_reads = count;
        self
    }

    /// Cordon and uncordon requests for this node fail
    pub fn rejecting_patches(mut self) -> Self {
        self.reject_patches = true;
        self
    }

    fn snapshot(&self) -> NodeRecord {
        let ready = self.readiness.front().copied().unwrap_or(false);
        NodeRecord {
            name: self.name.clone(),
            unschedulable: self.unschedulable,
            boot_id: self.boot_ids.front().cloned().unwrap_or_default(),
            conditions: Vec::new(),
        }
        .with_condition(READY_CONDITION, if ready { "True" } else { "False" })
    }

    fn advance(&mut self) {
        if self.boot_ids.len() > 1 {
            self.boot_ids.pop_front();
        }
        if self.readiness.len() > 1 {
            self.readiness.pop_front();
        }
    }
}

/// In-process cluster state
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    /// Nodes indexed by name
    nodes: Arc<DashMap<String, MemoryNode>>,

    /// Pods indexed by the node they are scheduled on
    pods: Arc<DashMap<String, Vec<PodRecord>>>,

    eviction: EvictionBehavior,

    journal: Arc<Mutex<Vec<ClusterCall>>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eviction(mut self, behavior: EvictionBehavior) -> Self {
        self.eviction = behavior;
        self
    }

    /// Add or replace a node
    pub fn add_node(&self, node: MemoryNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Schedule a pod onto a node
    pub fn place_pod(&self, node: &str, pod: PodRecord) {
        self.pods.entry(node.to_string()).or_default().push(pod);
    }

    /// Current state of a node without recording a call or advancing scripts
    pub fn peek_node(&self, name: &str) -> Option<NodeRecord> {
        self.nodes.get(name).map(|n| n.snapshot())
    }

    /// Pods currently on a node, without recording a call
    pub fn pods_on(&self, node: &str) -> Vec<PodRecord> {
        self.pods.get(node).map(|p| p.clone()).unwrap_or_default()
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Calls that changed cluster state
    pub fn mutating_calls(&self) -> Vec<ClusterCall> {
        self.calls().into_iter().filter(|c| c.is_mutating()).collect()
    }

    fn record(&self, call: ClusterCall) {
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list_nodes(&self, exclude_control_plane: bool) -> Result<Vec<String>, ClusterError> {
        self.record(ClusterCall::ListNodes {
            exclude_control_plane,
        });
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !(exclude_control_plane && n.control_plane))
            .map(|n| n.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_node(&self, name: &str) -> Result<NodeRecord, ClusterError> {
        self.record(ClusterCall::GetNode(name.to_string()));
        let mut node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ClusterError::NodeNotFound(name.to_string()))?;

        if node.failing_reads > 0 {
            node.failing_reads -= 1;
            return Err(ClusterError::Rejected(format!(
                "node '{}' temporarily unreadable",
                name
            )));
        }

        let record = node.snapshot();
        node.advance();
        Ok(record)
    }

    async fn set_unschedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::SetUnschedulable(name.to_string(), unschedulable));
        let mut node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| ClusterError::NodeNotFound(name.to_string()))?;

        if node.reject_patches {
            return Err(ClusterError::Rejected(format!(
                "patch of node '{}' refused",
                name
            )));
        }
        node.unschedulable = unschedulable;
        Ok(())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodRecord>, ClusterError> {
        self.record(ClusterCall::ListPods(node.to_string()));
        if !self.nodes.contains_key(node) {
            return Err(ClusterError::NodeNotFound(node.to_string()));
        }
        Ok(self.pods_on(node))
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), ClusterError> {
        self.record(ClusterCall::EvictPod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            grace_period_secs,
        });

        let qualified = format!("{}/{}", namespace, name);
        let mut host = self
            .pods
            .iter_mut()
            .find(|entry| entry.iter().any(|p| p.namespace == namespace && p.name == name))
            .ok_or_else(|| ClusterError::PodNotFound(qualified.clone()))?;

        match self.eviction {
            EvictionBehavior::Remove => {
                host.retain(|p| !(p.namespace == namespace && p.name == name));
            }
            EvictionBehavior::Terminate => {
                for pod in host.iter_mut() {
                    if pod.namespace == namespace && pod.name == name {
                        pod.deletion_requested = true;
                    }
                }
            }
            EvictionBehavior::Ignore => {}
            EvictionBehavior::Reject => {
                return Err(ClusterError::Rejected(format!(
                    "cannot evict {}: disruption budget exhausted",
                    qualified
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_boot_id_sequence_advances_and_sticks() {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("node-1").boot_ids(["abc", "xyz"]));

        assert_eq!(cluster.get_node("node-1").await.unwrap().boot_id, "abc");
        assert_eq!(cluster.get_node("node-1").await.unwrap().boot_id, "xyz");
        assert_eq!(cluster.get_node("node-1").await.unwrap().boot_id, "xyz");
    }

    #[tokio::test]
    async fn test_cordon_uncordon() {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("node-1"));

        cluster.set_unschedulable("node-1", true).await.unwrap();
        assert!(cluster.peek_node("node-1").unwrap().unschedulable);

        cluster.set_unschedulable("node-1", false).await.unwrap();
        assert!(!cluster.peek_node("node-1").unwrap().unschedulable);

        assert_eq!(cluster.mutating_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let cluster = InMemoryCluster::new();
        let result = cluster.get_node("ghost").await;
        assert!(matches!(result, Err(ClusterError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_failing_reads_recover() {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("node-1").failing_reads(1));

        assert!(cluster.get_node("node-1").await.is_err());
        assert!(cluster.get_node("node-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_nodes_excludes_control_plane() {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("cp-1").control_plane());
        cluster.add_node(MemoryNode::new("worker-2"));
        cluster.add_node(MemoryNode::new("worker-1"));

        let all = cluster.list_nodes(false).await.unwrap();
        assert_eq!(all, vec!["cp-1", "worker-1", "worker-2"]);

        let workers = cluster.list_nodes(true).await.unwrap();
        assert_eq!(workers, vec!["worker-1", "worker-2"]);
    }

    #[tokio::test]
    async fn test_eviction_behaviors() {
        let cluster = InMemoryCluster::new();
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "web"));

        cluster.evict_pod("default", "web", 30).await.unwrap();
        assert!(cluster.pods_on("node-1").is_empty());

        let cluster = InMemoryCluster::new().with_eviction(EvictionBehavior::Terminate);
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "web"));
        cluster.evict_pod("default", "web", 30).await.unwrap();
        assert!(cluster.pods_on("node-1")[0].deletion_requested);

        let cluster = InMemoryCluster::new().with_eviction(EvictionBehavior::Reject);
        cluster.add_node(MemoryNode::new("node-1"));
        cluster.place_pod("node-1", PodRecord::new("default", "web"));
        assert!(cluster.evict_pod("default", "web", 30).await.is_err());
        assert_eq!(cluster.pods_on("node-1").len(), 1);
    }
}
