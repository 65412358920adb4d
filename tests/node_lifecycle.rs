//! Integration tests for the per-node reboot cycle
//!
//! Each test scripts an in-memory cluster (boot ID and readiness sequences,
//! pod placement) and drives one node through the full lifecycle.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use k8s_restart::cluster::{ClusterCall, InMemoryCluster, MemoryNode, PodRecord, DAEMONSET_KIND};
use k8s_restart::config::RunConfig;
use k8s_restart::events::{MemorySink, RunEvent};
use k8s_restart::lifecycle::{LifecycleError, NodeLifecycle, NodeState};
use k8s_restart::remote::{is_reboot_command, NodeTarget, RemoteError, RemoteExec, RemoteOutcome};

/// Remote shell that drops the connection on reboot commands, like a real host
#[derive(Default)]
struct ScriptedRemote {
    commands: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExec for ScriptedRemote {
    async fn run(&self, address: &str, command: &str) -> Result<RemoteOutcome, RemoteError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{} {}", address, command));
        if is_reboot_command(command) {
            Ok(RemoteOutcome::ConnectionDropped)
        } else {
            Ok(RemoteOutcome::Completed)
        }
    }
}

fn test_config() -> RunConfig {
    RunConfig {
        poll_interval: Duration::from_secs(10),
        boot_id_timeout: Duration::from_secs(300),
        ready_timeout: Duration::from_secs(180),
        drain_timeout: Duration::from_secs(600),
        ..Default::default()
    }
}

fn target(node: &str) -> NodeTarget {
    NodeTarget::resolve(node, &test_config().ssh)
}

#[tokio::test(start_paused = true)]
async fn test_cordoned_node_with_daemonset_pod_completes() {
    let cluster = InMemoryCluster::new();
    // Reads: inspect, two boot ID polls, then three readiness polls
    cluster.add_node(
        MemoryNode::new("worker-1")
            .cordoned()
            .boot_ids(["abc", "abc", "xyz"])
            .readiness([true, true, true, false, false, true]),
    );
    cluster.place_pod(
        "worker-1",
        PodRecord::new("kube-system", "kube-proxy-x").owned_by(DAEMONSET_KIND),
    );
    let remote = ScriptedRemote::default();
    let sink = MemorySink::new();
    let config = test_config();

    let outcome = NodeLifecycle::new(&cluster, &remote, &config, &sink)
        .run(&target("worker-1"))
        .await;

    assert_eq!(outcome.state, NodeState::Done);
    assert!(outcome.error.is_none());
    assert!(outcome.warnings.is_empty());

    let events = sink.events_for("worker-1");
    assert!(events.contains(&RunEvent::AlreadyCordoned {
        node: "worker-1".to_string()
    }));
    assert!(events.contains(&RunEvent::RebootConfirmed {
        node: "worker-1".to_string(),
        ticks: 2
    }));
    assert!(events.contains(&RunEvent::NodeReady {
        node: "worker-1".to_string(),
        ticks: 3
    }));
    assert!(events.contains(&RunEvent::RebootSent {
        node: "worker-1".to_string(),
        address: "worker-1".to_string(),
        connection_dropped: true,
    }));

    assert_eq!(
        cluster.mutating_calls(),
        vec![ClusterCall::SetUnschedulable("worker-1".to_string(), false)]
    );
    assert_eq!(cluster.pods_on("worker-1").len(), 1);
    assert_eq!(remote.commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_phases_are_entered_in_order() {
    let cluster = InMemoryCluster::new();
    cluster.add_node(MemoryNode::new("worker-1").boot_ids(["abc", "def"]));
    let remote = ScriptedRemote::default();
    let sink = MemorySink::new();
    let config = test_config();

    NodeLifecycle::new(&cluster, &remote, &config, &sink)
        .run(&target("worker-1"))
        .await;

    let phases: Vec<NodeState> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::PhaseEntered { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            NodeState::Start,
            NodeState::Cordoning,
            NodeState::Draining,
            NodeState::Rebooting,
            NodeState::VerifyingReboot,
            NodeState::VerifyingReady,
            NodeState::Uncordoning,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_boot_id_fails_and_keeps_node_cordoned() {
    let cluster = InMemoryCluster::new();
    cluster.add_node(MemoryNode::new("worker-1").boot_ids(["abc"]));
    let remote = ScriptedRemote::default();
    let sink = MemorySink::new();
    let config = test_config();

    let outcome = NodeLifecycle::new(&cluster, &remote, &config, &sink)
        .run(&target("worker-1"))
        .await;

    assert_eq!(outcome.state, NodeState::Failed);
    match outcome.error {
        Some(LifecycleError::Timeout { phase, node, timeout }) => {
            assert_eq!(phase, NodeState::VerifyingReboot);
            assert_eq!(node, "worker-1");
            assert_eq!(timeout, Duration::from_secs(300));
        }
        other => panic!("Expected boot ID timeout, got {:?}", other),
    }

    assert!(cluster.peek_node("worker-1").unwrap().unschedulable);
    assert!(!cluster
        .calls()
        .contains(&ClusterCall::SetUnschedulable("worker-1".to_string(), false)));
    assert!(sink.events().iter().any(|e| matches!(e, RunEvent::NodeFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_pod_fails_drain_before_reboot() {
    let cluster = InMemoryCluster::new()
        .with_eviction(k8s_restart::cluster::EvictionBehavior::Ignore);
    cluster.add_node(MemoryNode::new("worker-1").boot_ids(["abc", "def"]));
    cluster.place_pod("worker-1", PodRecord::new("default", "stubborn"));
    let remote = ScriptedRemote::default();
    let sink = MemorySink::new();
    let config = RunConfig {
        drain_timeout: Duration::from_secs(30),
        ..test_config()
    };

    let outcome = NodeLifecycle::new(&cluster, &remote, &config, &sink)
        .run(&target("worker-1"))
        .await;

    let error = outcome.error.unwrap();
    assert_eq!(error.phase(), NodeState::Draining);
    assert!(error.is_timeout());
    assert!(remote.commands().is_empty());
}

#[tokio::test]
async fn test_dry_run_makes_no_mutating_calls() {
    let cluster = InMemoryCluster::new();
    cluster.add_node(MemoryNode::new("worker-1").boot_ids(["abc"]));
    cluster.place_pod("worker-1", PodRecord::new("default", "web-1"));
    cluster.place_pod("worker-1", PodRecord::new("default", "web-2"));
    let remote = ScriptedRemote::default();
    let sink = MemorySink::new();
    let config = RunConfig {
        dry_run: true,
        ..test_config()
    };

    let outcome = NodeLifecycle::new(&cluster, &remote, &config, &sink)
        .run(&target("worker-1"))
        .await;

    assert!(outcome.is_success());
    assert!(cluster.mutating_calls().is_empty());
    assert!(remote.commands().is_empty());
    assert_eq!(cluster.pods_on("worker-1").len(), 2);

    let planned = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, RunEvent::EvictionPlanned { .. }))
        .count();
    assert_eq!(planned, 2);
    assert!(sink.events().contains(&RunEvent::PhasesSkipped {
        node: "worker-1".to_string(),
        phases: vec![NodeState::VerifyingReboot, NodeState::VerifyingReady],
    }));
}
