//! Kubernetes apiserver probing client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;

use crate::{types::Instance, SandparkError, SandparkResult};

use super::{ClusterBackend, ClusterFactory};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The apiserver port instances expose when they run a control plane.
const KUBE_APISERVER_PORT: u16 = 6443;

/// Node labels marking a control-plane node.
const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Probe requests stay short; the tick loop must never pile up behind a
/// wedged apiserver.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ClusterBackend`] probing one instance's apiserver.
///
/// Playground clusters run with anonymous auth enabled and self-signed
/// certificates, so the client skips verification and sends no credentials.
pub struct KubeApiClient {
    client: Client,
    base_url: String,
    hostname: String,
}

/// [`ClusterFactory`] memoizing one probing client per instance.
pub struct LocalCachedClusterFactory {
    clients: DashMap<String, Arc<dyn ClusterBackend>>,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    metadata: NodeMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct NodeMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    #[serde(default, rename = "nodePort")]
    node_port: i32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KubeApiClient {
    /// Dials the apiserver expected on `instance`, verifying reachability
    /// with a version probe so callers can skip non-cluster instances early.
    pub async fn connect(instance: &Instance) -> SandparkResult<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .build()?;

        let probe = Self {
            client,
            base_url: format!("https://{}:{}", instance.ip, KUBE_APISERVER_PORT),
            hostname: instance.hostname.clone(),
        };

        let resp = probe
            .client
            .get(format!("{}/version", probe.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SandparkError::Backend(format!(
                "apiserver on {} answered {}",
                instance.name,
                resp.status()
            )));
        }

        Ok(probe)
    }

    async fn nodes(&self) -> SandparkResult<NodeList> {
        let resp = self
            .client
            .get(format!("{}/api/v1/nodes", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SandparkError::Backend(format!(
                "node list failed: {}",
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }
}

impl LocalCachedClusterFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl Default for LocalCachedClusterFactory {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ClusterBackend for KubeApiClient {
    async fn is_manager(&self) -> SandparkResult<bool> {
        let nodes = self.nodes().await?;

        Ok(nodes.items.iter().any(|node| {
            node.metadata.name == self.hostname
                && CONTROL_PLANE_LABELS
                    .iter()
                    .any(|label| node.metadata.labels.contains_key(*label))
        }))
    }

    async fn node_names(&self) -> SandparkResult<Vec<String>> {
        let nodes = self.nodes().await?;
        Ok(nodes.items.into_iter().map(|n| n.metadata.name).collect())
    }

    async fn exposed_node_ports(&self) -> SandparkResult<Vec<i32>> {
        let resp = self
            .client
            .get(format!("{}/api/v1/services", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SandparkError::Backend(format!(
                "service list failed: {}",
                resp.status()
            )));
        }

        let services: ServiceList = resp.json().await?;
        Ok(services
            .items
            .into_iter()
            .flat_map(|s| s.spec.ports)
            .map(|p| p.node_port)
            .filter(|p| *p > 0)
            .collect())
    }
}

#[async_trait]
impl ClusterFactory for LocalCachedClusterFactory {
    async fn for_instance(&self, instance: &Instance) -> SandparkResult<Arc<dyn ClusterBackend>> {
        if let Some(client) = self.clients.get(&instance.name) {
            return Ok(client.clone());
        }

        let client: Arc<dyn ClusterBackend> = Arc::new(KubeApiClient::connect(instance).await?);
        self.clients.insert(instance.name.clone(), client.clone());

        Ok(client)
    }

    fn evict_session(&self, session_id: &str) {
        let suffix = format!("_{}", session_id);
        self.clients.retain(|name, _| !name.ends_with(&suffix));
    }
}
