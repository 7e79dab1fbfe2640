//! Kubernetes role classification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    cluster::ClusterFactory,
    event::{EventBus, EventType},
    types::Instance,
    SandparkResult,
};

use super::{ClusterStatus, Task};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Classifies an instance within the session's Kubernetes cluster and emits
/// `instance k8s status`.
pub struct CheckK8sClusterStatus {
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn ClusterFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CheckK8sClusterStatus {
    /// Creates the task.
    pub fn new(broker: Arc<dyn EventBus>, factory: Arc<dyn ClusterFactory>) -> Self {
        Self { broker, factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Whether the image name indicates a Kubernetes cluster role. Plain DinD
/// instances skip the k8s probes entirely.
pub(super) fn looks_like_k8s(instance: &Instance) -> bool {
    let image = instance.image.to_lowercase();
    image.contains("k8s") || image.contains("kubernetes")
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Task for CheckK8sClusterStatus {
    fn name(&self) -> &'static str {
        "CheckK8sClusterStatus"
    }

    async fn run(&self, _ctx: CancellationToken, instance: &Instance) -> SandparkResult<()> {
        if !looks_like_k8s(instance) {
            return Ok(());
        }

        // No reachable apiserver means no cluster (yet); skip silently.
        let Result::Ok(client) = self.factory.for_instance(instance).await else {
            return Ok(());
        };

        let mut status = ClusterStatus {
            instance: instance.name.clone(),
            ..Default::default()
        };
        if client.is_manager().await? {
            status.is_manager = true;
        } else {
            status.is_worker = true;
        }

        self.broker.emit(
            EventType::InstanceK8sStatus,
            &instance.session_id,
            serde_json::to_value(status)?,
        );

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_gate() {
        let with_image = |image: &str| Instance {
            image: image.to_string(),
            ..Default::default()
        };

        assert!(looks_like_k8s(&with_image("franela/k8s:latest")));
        assert!(looks_like_k8s(&with_image("rancher/Kubernetes-node")));
        assert!(!looks_like_k8s(&with_image("franela/dind:latest")));
    }
}
