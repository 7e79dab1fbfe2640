//! Swarm-published port discovery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    docker::BackendFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::{ClusterPorts, Task};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Enumerates nodes and service-published ports of the swarm an instance
/// manages and emits `instance cluster ports`.
pub struct CheckSwarmPorts {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn BackendFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CheckSwarmPorts {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { broker, factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CheckSwarmPorts {
    fn name(&self) -> &'static str {
        "CheckSwarmPorts"
    }

    async fn run(&self, _ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        let client = self.factory.for_instance(instance).await?;

        // Only managers hold the cluster-wide service view.
        let info = client.daemon_info().await?;
        if !(info.swarm_node_state == "active" && info.swarm_control_available) {
            return Ok(());
        }

        let (hosts, ports) = client.swarm_ports().await?;
        let payload = ClusterPorts {
            manager: instance.name.clone(),
            instances: hosts,
            ports: ports.into_iter().map(i32::from).collect(),
        };

        self.broker.emit(
            EventType::InstanceClusterPorts,
            &instance.session_id,
            serde_json::to_value(payload)?,
        );

        Ok(())
    }
}
