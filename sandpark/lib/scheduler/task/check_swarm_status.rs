//! Swarm role classification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    docker::BackendFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::{ClusterStatus, Task};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Classifies an instance as swarm manager, worker or neither and emits
/// `instance swarm status`.
pub struct CheckSwarmStatus {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn BackendFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CheckSwarmStatus {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { broker, factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CheckSwarmStatus {
    fn name(&self) -> &'static str {
        "CheckSwarmStatus"
    }

    async fn run(&self, _ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        let client = self.factory.for_instance(instance).await?;
        let info = client.daemon_info().await?;

        let mut status = ClusterStatus {
            instance: instance.name.clone(),
            ..Default::default()
        };
        if info.swarm_node_state == "active" {
            if info.swarm_control_available {
                status.is_manager = true;
            } else {
                status.is_worker = true;
            }
        }

        self.broker.emit(
            EventType::InstanceSwarmStatus,
            &instance.session_id,
            serde_json::to_value(status)?,
        );

        Ok(())
    }
}
