//! # k8s-restart
//!
//! Unattended reboot cycling for Kubernetes nodes. For every target node the
//! tool cordons it, evicts its workloads, issues a reboot over SSH, confirms
//! the boot ID changed, waits for the node to report `Ready` again and finally
//! uncordons it. Nodes are processed one at a time and a failure on one node
//! never stops the rest of the run.
//!
//! ```text
//!   RunCoordinator ──► NodeLifecycle (per node) ──► EvictionController
//!         │                   │                 └─► ConditionWaiter
//!         │                   ├─► ClusterApi   (kube / in-memory)
//!         │                   └─► RemoteExec   (ssh)
//!         └──► RunResult (exit status)
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod drain;
pub mod events;
pub mod lifecycle;
pub mod remote;
pub mod run;
pub mod wait;
