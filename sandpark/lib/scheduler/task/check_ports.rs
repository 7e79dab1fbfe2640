//! Published port discovery.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    docker::BackendFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::Task;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Enumerates the ports published on an instance's nested daemon and emits
/// `instance checked ports`.
pub struct CheckPorts {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn BackendFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CheckPorts {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { broker, factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CheckPorts {
    fn name(&self) -> &'static str {
        "CheckPorts"
    }

    async fn run(&self, _ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        let client = self.factory.for_instance(instance).await?;

        // Swarm workers report their ports through the manager's service
        // view; probing them directly would double-count.
        let info = client.daemon_info().await?;
        if info.swarm_node_state == "active" && !info.swarm_control_available {
            return Ok(());
        }

        let ports = client.published_ports().await?;
        self.broker.emit(
            EventType::InstanceCheckedPorts,
            &instance.session_id,
            serde_json::to_value(ports)?,
        );

        Ok(())
    }
}
