//! Probing tasks.
//!
//! Every task has the same shape: return quickly when the instance is not of
//! interest, derive a backend client through the per-instance factory, emit
//! exactly one event per successful run keyed by the instance's session id,
//! and never outlive the context it was handed.

mod check_k8s_ports;
mod check_k8s_status;
mod check_ports;
mod check_swarm_ports;
mod check_swarm_status;
mod collect_stats;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{config::TASK_RUN_TIMEOUT, types::Instance, SandparkResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use check_k8s_ports::*;
pub use check_k8s_status::*;
pub use check_ports::*;
pub use check_swarm_ports::*;
pub use check_swarm_status::*;
pub use collect_stats::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A probing task driven by the scheduler.
#[async_trait]
pub trait Task: Send + Sync {
    /// The task name, used for in-flight bookkeeping and playground task
    /// filters.
    fn name(&self) -> &'static str;

    /// The per-run deadline. `None` marks a long-lived task that ends only
    /// when its context cancels.
    fn timeout(&self) -> Option<Duration> {
        Some(TASK_RUN_TIMEOUT)
    }

    /// Probes `instance` once. `ctx` cancels when the instance is deleted,
    /// its session closes, or the scheduler drains.
    async fn run(&self, ctx: CancellationToken, instance: &Instance) -> SandparkResult<()>;
}

/// Cluster role of an instance, as emitted by the status probes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStatus {
    /// The instance name.
    pub instance: String,

    /// Whether the instance is a manager / control-plane node.
    pub is_manager: bool,

    /// Whether the instance is a worker node.
    pub is_worker: bool,
}

/// Ports published across a cluster, as emitted by the port probes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterPorts {
    /// The managing instance the probe ran against.
    pub manager: String,

    /// The node names of the cluster.
    pub instances: Vec<String>,

    /// The published ports.
    pub ports: Vec<i32>,
}
