//! Cluster-manager probing capability.
//!
//! Sessions may bootstrap a Kubernetes cluster across their instances. The
//! core never manages that cluster; the scheduler only probes it, so the
//! capability surface is read-only and deliberately small.

mod kube;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{types::Instance, SandparkResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use kube::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Read-only view of the cluster an instance participates in.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Whether the instance this client dials is a control-plane node.
    async fn is_manager(&self) -> SandparkResult<bool>;

    /// The node names of the cluster.
    async fn node_names(&self) -> SandparkResult<Vec<String>>;

    /// The node ports exposed by cluster services.
    async fn exposed_node_ports(&self) -> SandparkResult<Vec<i32>>;
}

/// Hands out [`ClusterBackend`] clients per instance.
#[async_trait]
pub trait ClusterFactory: Send + Sync {
    /// The probing client for `instance`. Fails when the instance does not
    /// expose a reachable apiserver.
    async fn for_instance(&self, instance: &Instance) -> SandparkResult<Arc<dyn ClusterBackend>>;

    /// Drops every cached client of the session's instances.
    fn evict_session(&self, session_id: &str);
}
