//! Overlay session provisioner.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    docker::{BackendFactory, NetworkCreateOpts},
    types::Session,
    SandparkResult,
};

use super::SessionProvisioner;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Label carrying the owning session id on every session network.
pub const SESSION_ID_LABEL: &str = "com.sandpark.session.id";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// [`SessionProvisioner`] backing each session with one user-defined network
/// named after the session id.
pub struct OverlaySessionProvisioner {
    factory: Arc<dyn BackendFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverlaySessionProvisioner {
    /// Creates a provisioner driving networks through `factory`.
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self { factory }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SessionProvisioner for OverlaySessionProvisioner {
    async fn session_new(&self, session: &Session) -> SandparkResult<()> {
        let client = self.factory.for_session(&session.id).await?;

        let mut labels = HashMap::new();
        labels.insert(SESSION_ID_LABEL.to_string(), session.id.clone());

        client
            .network_create(
                &session.id,
                NetworkCreateOpts::builder()
                    .attachable(true)
                    .labels(labels)
                    .build(),
            )
            .await
    }

    async fn session_close(&self, session: &Session) -> SandparkResult<()> {
        let client = self.factory.for_session(&session.id).await?;

        match client.network_delete(&session.id).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(session = %session.id, "session network already gone");
                Ok(())
            }
            other => other,
        }
    }
}
