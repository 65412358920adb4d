//! Cluster capability
//!
//! Everything the reboot workflow needs from the control plane is expressed
//! through the [`ClusterApi`] trait over plain records ([`NodeRecord`],
//! [`PodRecord`]). Two implementations ship with the crate:
//!
//! - [`KubeCluster`]: talks to a real API server through `kube`
//! - [`InMemoryCluster`]: in-process test backend

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod kube_client;
pub mod memory;

pub use kube_client::KubeCluster;
pub use memory::{ClusterCall, EvictionBehavior, InMemoryCluster, MemoryNode};

/// Annotation set by the kubelet on mirror pods of static manifests
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Legacy annotation marking a system pod as critical
pub const CRITICAL_POD_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/critical-pod";

/// Namespace reserved for cluster system components
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Owner kind whose pods are recreated on every node
pub const DAEMONSET_KIND: &str = "DaemonSet";

/// Label selector that filters out control plane nodes
pub const WORKER_NODE_SELECTOR: &str =
    "!node-role.kubernetes.io/control-plane,!node-role.kubernetes.io/master";

/// Node condition type reporting kubelet health
pub const READY_CONDITION: &str = "Ready";

/// Errors surfaced by a cluster backend
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Pod '{0}' not found")]
    PodNotFound(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Client configuration error: {0}")]
    Config(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// A single reported node condition (type + status string)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True", "False" or "Unknown"
    pub status: String,
}

impl NodeCondition {
    pub fn new(condition_type: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: status.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// The subset of a node object the reboot workflow reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,

    /// Whether scheduling of new pods is disabled (cordoned)
    pub unschedulable: bool,

    /// Boot ID reported by the kubelet; empty when unknown
    pub boot_id: String,

    pub conditions: Vec<NodeCondition>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_boot_id(mut self, boot_id: impl Into<String>) -> Self {
        self.boot_id = boot_id.into();
        self
    }

    pub fn with_condition(mut self, condition_type: &str, status: &str) -> Self {
        self.conditions
            .push(NodeCondition::new(condition_type, status));
        self
    }

    pub fn cordoned(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&NodeCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// A pod scheduled onto a node, reduced to what eviction decisions need
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,

    /// Kinds of all owner references (e.g. "ReplicaSet", "DaemonSet")
    pub owner_kinds: Vec<String>,

    /// Deletion timestamp is set: the pod is already terminating
    pub deletion_requested: bool,
}

impl PodRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn owned_by(mut self, kind: &str) -> Self {
        self.owner_kinds.push(kind.to_string());
        self
    }

    pub fn terminating(mut self) -> Self {
        self.deletion_requested = true;
        self
    }

    /// Non-empty annotation value, matching how the kubelet treats markers
    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.get(key).is_some_and(|v| !v.is_empty())
    }

    pub fn has_owner_kind(&self, kind: &str) -> bool {
        self.owner_kinds.iter().any(|k| k == kind)
    }

    /// "namespace/name"
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Control plane operations used by the reboot workflow
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of all nodes, optionally skipping control plane nodes
    async fn list_nodes(&self, exclude_control_plane: bool) -> Result<Vec<String>, ClusterError>;

    async fn get_node(&self, name: &str) -> Result<NodeRecord, ClusterError>;

    /// Cordon (`true`) or uncordon (`false`) a node
    async fn set_unschedulable(&self, name: &str, unschedulable: bool)
        -> Result<(), ClusterError>;

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodRecord>, ClusterError>;

    /// Request a graceful eviction through the Eviction API
    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), ClusterError>;
}
