//! Session and instance provisioners.
//!
//! Provisioners own the boundary between the entity graph and the external
//! world: they acquire and release the containers, networks and volumes
//! backing an entity, recover partial state locally, and hand one classified
//! error back to the core.

mod dind;
mod overlay;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    types::{Instance, InstanceConfig, Session},
    SandparkError, SandparkResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use dind::*;
pub use overlay::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The instance class served by the default provisioner.
pub const INSTANCE_KIND_LINUX: &str = "linux";

/// Backend error fragments that mean the cluster cannot place more work.
const CAPACITY_MARKERS: [&str; 3] = [
    "no suitable node",
    "insufficient resources",
    "disk quota exceeded",
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Acquires and releases the resources backing one instance.
#[async_trait]
pub trait InstanceProvisioner: Send + Sync {
    /// Provisions a sandbox host for `session` and returns the populated
    /// instance. Leaves no straggler resources on failure.
    async fn instance_new(
        &self,
        session: &Session,
        config: InstanceConfig,
    ) -> SandparkResult<Instance>;

    /// Releases the resources backing `instance`. Backend failures are
    /// logged, not returned: user-visible state must never stay stranded
    /// behind a silent backend error.
    async fn instance_delete(&self, session: &Session, instance: &Instance) -> SandparkResult<()>;
}

/// Acquires and releases the shared substrate of a session.
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    /// Creates the session's substrate (its overlay network).
    async fn session_new(&self, session: &Session) -> SandparkResult<()>;

    /// Removes the session's substrate once all instances are gone.
    /// Idempotent: a substrate that is already gone is a no-op.
    async fn session_close(&self, session: &Session) -> SandparkResult<()>;
}

/// Selects an [`InstanceProvisioner`] by instance class.
///
/// Only the nested-container class is registered today; the seam stays so a
/// future class (Windows hosts) can slot in without touching the core.
pub struct InstanceProvisionerFactory {
    by_kind: HashMap<String, Arc<dyn InstanceProvisioner>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl InstanceProvisionerFactory {
    /// Builds a factory with `provisioner` serving `kind`.
    pub fn new(kind: &str, provisioner: Arc<dyn InstanceProvisioner>) -> Self {
        let mut by_kind: HashMap<String, Arc<dyn InstanceProvisioner>> = HashMap::new();
        by_kind.insert(kind.to_string(), provisioner);
        Self { by_kind }
    }

    /// Registers `provisioner` for an additional instance class.
    pub fn register(&mut self, kind: &str, provisioner: Arc<dyn InstanceProvisioner>) {
        self.by_kind.insert(kind.to_string(), provisioner);
    }

    /// The provisioner serving `kind`; the linux class when `kind` is empty.
    pub fn get(&self, kind: &str) -> SandparkResult<Arc<dyn InstanceProvisioner>> {
        let kind = if kind.is_empty() {
            INSTANCE_KIND_LINUX
        } else {
            kind
        };

        self.by_kind
            .get(kind)
            .cloned()
            .ok_or_else(|| {
                SandparkError::Validation(format!("no provisioner for instance type {}", kind))
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reclassifies backend refusals that mean "out of capacity" so callers can
/// redirect to the capacity page instead of failing with a plain error.
pub fn classify_capacity(error: SandparkError) -> SandparkError {
    if let SandparkError::Backend(message) = &error {
        let lowered = message.to_lowercase();
        if CAPACITY_MARKERS.iter().any(|m| lowered.contains(m)) {
            return SandparkError::OutOfCapacity(message.clone());
        }
    }

    error
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_markers_reclassify() {
        let err = classify_capacity(SandparkError::Backend(
            "rpc error: no suitable node (scheduling constraints)".to_string(),
        ));
        assert!(err.is_out_of_capacity());

        let err = classify_capacity(SandparkError::Backend("connection refused".to_string()));
        assert!(!err.is_out_of_capacity());

        let err = classify_capacity(SandparkError::NotFound("instance x".to_string()));
        assert!(err.is_not_found());
    }
}
