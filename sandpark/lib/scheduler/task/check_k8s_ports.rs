//! Kubernetes exposed-port discovery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    cluster::ClusterFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::{check_k8s_status::looks_like_k8s, ClusterPorts, Task};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Enumerates node ports exposed across the Kubernetes cluster an instance
/// manages and emits `instance k8s cluster ports`.
pub struct CheckK8sClusterExposedPorts {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn ClusterFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CheckK8sClusterExposedPorts {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn ClusterFactory>) -> Self {
        Self { broker, factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CheckK8sClusterExposedPorts {
    fn name(&self) -> &'static str {
        "CheckK8sClusterPorts"
    }

    async fn run(&self, _ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        if !looks_like_k8s(instance) {
            return Ok(());
        }

        let Result::Ok(client) = self.factory.for_instance(instance).await else {
            return Ok(());
        };

        // The cluster-wide view lives on the control plane.
        if !client.is_manager().await? {
            return Ok(());
        }

        let ports = client.exposed_node_ports().await?;
        let instances = client.node_names().await?;

        let payload = ClusterPorts {
            manager: instance.name.clone(),
            instances,
            ports,
        };

        self.broker.emit(
            EventType::InstanceK8sClusterPorts,
            &instance.session_id,
            serde_json::to_value(payload)?,
        );

        Ok(())
    }
}
