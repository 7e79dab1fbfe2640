//! Cached backend client factory.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    config::{Config, DIND_PORT, DIND_TLS_PORT},
    types::Instance,
    SandparkResult,
};

use super::{ContainerBackend, DockerApiClient, TlsMaterial};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Hands out [`ContainerBackend`] clients for sessions and instances.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// The client driving the daemon a session's containers run on.
    async fn for_session(&self, session_id: &str) -> SandparkResult<Arc<dyn ContainerBackend>>;

    /// The client driving the nested daemon inside an instance.
    async fn for_instance(&self, instance: &Instance) -> SandparkResult<Arc<dyn ContainerBackend>>;

    /// Drops the cached client of one instance.
    fn evict_instance(&self, name: &str);

    /// Drops the session's cached client and every cached client of its
    /// instances. Called on session close.
    fn evict_session(&self, session_id: &str);
}

/// [`BackendFactory`] memoizing clients in-process.
///
/// The first access for an instance does the TLS material lookup and client
/// handshake; subsequent accesses are O(1). Eviction is tied to session
/// closure.
pub struct LocalCachedFactory {
    config: Arc<Config>,
    sessions: DashMap<String, Arc<dyn ContainerBackend>>,
    instances: DashMap<String, Arc<dyn ContainerBackend>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LocalCachedFactory {
    /// Creates an empty factory over the configured host daemon.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            instances: DashMap::new(),
        }
    }

    fn instance_endpoint(&self, instance: &Instance) -> String {
        let tls = instance.tls || *self.config.get_force_tls();
        let port = if tls { DIND_TLS_PORT } else { DIND_PORT };
        format!("tcp://{}:{}", instance.ip, port)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BackendFactory for LocalCachedFactory {
    async fn for_session(&self, session_id: &str) -> SandparkResult<Arc<dyn ContainerBackend>> {
        if let Some(client) = self.sessions.get(session_id) {
            return Ok(client.clone());
        }

        // Sandbox placement is single-node: every session's containers run
        // on the one configured host daemon.
        let client: Arc<dyn ContainerBackend> =
            Arc::new(DockerApiClient::connect(self.config.get_docker_host(), None)?);
        self.sessions
            .insert(session_id.to_string(), client.clone());

        Ok(client)
    }

    async fn for_instance(&self, instance: &Instance) -> SandparkResult<Arc<dyn ContainerBackend>> {
        if let Some(client) = self.instances.get(&instance.name) {
            return Ok(client.clone());
        }

        let tls_material = if instance.tls && !instance.ca_cert.is_empty() {
            Some(TlsMaterial {
                ca: instance.ca_cert.clone(),
                cert: instance.cert.clone(),
                key: instance.key.clone(),
            })
        } else {
            None
        };

        let client: Arc<dyn ContainerBackend> = Arc::new(DockerApiClient::connect(
            &self.instance_endpoint(instance),
            tls_material.as_ref(),
        )?);
        self.instances
            .insert(instance.name.clone(), client.clone());

        Ok(client)
    }

    fn evict_instance(&self, name: &str) {
        self.instances.remove(name);
    }

    fn evict_session(&self, session_id: &str) {
        self.sessions.remove(session_id);

        let suffix = format!("_{}", session_id);
        self.instances.retain(|name, _| !name.ends_with(&suffix));
    }
}
