//! Kubernetes-backed cluster implementation
//!
//! Thin adapter from the `kube` client onto [`ClusterApi`]. Conversions from
//! the `k8s-openapi` objects into plain records are pure functions so they can
//! be tested without an API server.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{ClusterApi, ClusterError, NodeCondition, NodeRecord, PodRecord, WORKER_NODE_SELECTOR};

/// Cluster backend talking to a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig (and optional context),
    /// falling back to the default inference chain (`$HOME/.kube/config`,
    /// then in-cluster service account).
    pub async fn connect(
        kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> Result<Self, ClusterError> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };

        let config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Config(format!("reading {}: {}", path.display(), e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ClusterError::Config(e.to_string()))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?,
            (None, None) => Config::infer()
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        };

        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self, exclude_control_plane: bool) -> Result<Vec<String>, ClusterError> {
        let mut params = ListParams::default();
        if exclude_control_plane {
            params = params.labels(WORKER_NODE_SELECTOR);
        }
        let list = self.nodes().list(&params).await?;
        Ok(list.items.iter().map(|n| n.name_any()).collect())
    }

    async fn get_node(&self, name: &str) -> Result<NodeRecord, ClusterError> {
        let node = self.nodes().get(name).await?;
        Ok(node_record(&node))
    }

    async fn set_unschedulable(
        &self,
        name: &str,
        unschedulable: bool,
    ) -> Result<(), ClusterError> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(node = %name, unschedulable, "Patched node schedulability");
        Ok(())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodRecord>, ClusterError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node));
        let list = pods.list(&params).await?;
        Ok(list.items.iter().map(pod_record).collect())
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_secs: u32,
    ) -> Result<(), ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(grace_period_secs),
                ..Default::default()
            }),
            ..Default::default()
        };
        pods.evict(name, &params).await?;
        Ok(())
    }
}

// ============================================================================
// Object conversions (no I/O)
// ============================================================================

/// Reduce a node object to the fields the workflow reads
pub fn node_record(node: &Node) -> NodeRecord {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    let status = node.status.as_ref();
    let boot_id = status
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.boot_id.clone())
        .unwrap_or_default();
    let conditions = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| NodeCondition::new(c.type_.clone(), c.status.clone()))
                .collect()
        })
        .unwrap_or_default();

    NodeRecord {
        name: node.name_any(),
        unschedulable,
        boot_id,
        conditions,
    }
}

/// Reduce a pod object to the fields eviction decisions need
pub fn pod_record(pod: &Pod) -> PodRecord {
    let meta = &pod.metadata;
    PodRecord {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        owner_kinds: meta
            .owner_references
            .as_ref()
            .map(|refs| refs.iter().map(|r| r.kind.clone()).collect())
            .unwrap_or_default(),
        deletion_requested: meta.deletion_timestamp.is_some(),
    }
}
