//! Docker Engine API client.

use std::{collections::HashMap, io::Read, time::Duration};

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::{future, stream, StreamExt, TryStreamExt};
use reqwest::{Certificate, Client, Identity, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time,
};

use crate::{
    config::{
        CONTAINER_CERT_DIR, CONTAINER_DATA_DIR, CONTAINER_DOCKER_DIR, CONTAINER_READY_POLL_INTERVAL,
        CONTAINER_READY_TIMEOUT, IMAGE_SEARCH_LIMIT,
    },
    SandparkError, SandparkResult,
};

use super::{
    clamp_cpu, clamp_memory, cpuset_for, AttachIo, ByteStream, ContainerBackend,
    CreateContainerOpts, DaemonInfo, NetworkCreateOpts, NetworkResource, SwarmTokens,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The engine API version prefix every request is pinned to.
const ENGINE_API_VERSION: &str = "v1.41";

/// Bytes per megabyte; memory limits travel as MB and the daemon wants bytes.
const MEGABYTE: i64 = 1024 * 1024;

/// Detach key sequence for attached terminals, percent-encoded for the query
/// string (`ctrl-^,ctrl-^`).
const ATTACH_DETACH_KEYS: &str = "ctrl-%5E%2Cctrl-%5E";

/// How often a pending exec is re-inspected for completion.
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(200);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// PEM material for dialing a TLS-guarded daemon.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    /// The CA certificate the daemon's certificate chains to.
    pub ca: Vec<u8>,

    /// The client certificate.
    pub cert: Vec<u8>,

    /// The client key.
    pub key: Vec<u8>,
}

/// A [`ContainerBackend`] speaking the Docker Engine HTTP API.
///
/// Reads go through a retrying client (transient failures against a daemon
/// that is still booting are common); mutations go through the bare client so
/// a timed-out create is never replayed.
pub struct DockerApiClient {
    host: String,
    base_url: String,
    client: Client,
    retrying: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct EngineError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Created {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSettings {
    #[serde(default, rename = "IPAddress")]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(default, rename = "Ports")]
    ports: Vec<PortSummary>,
}

#[derive(Debug, Deserialize)]
struct PortSummary {
    #[serde(default, rename = "PublicPort")]
    public_port: u16,
}

#[derive(Debug, Deserialize)]
struct NodeSummary {
    #[serde(default, rename = "Description")]
    description: NodeDescription,
}

#[derive(Debug, Default, Deserialize)]
struct NodeDescription {
    #[serde(default, rename = "Hostname")]
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct ServiceSummary {
    #[serde(default, rename = "Endpoint")]
    endpoint: ServiceEndpoint,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceEndpoint {
    #[serde(default, rename = "Ports")]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    #[serde(default, rename = "PublishedPort")]
    published_port: u16,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default, rename = "Name")]
    name: String,
    #[serde(default, rename = "Swarm")]
    swarm: SwarmState,
}

#[derive(Debug, Default, Deserialize)]
struct SwarmState {
    #[serde(default, rename = "LocalNodeState")]
    local_node_state: String,
    #[serde(default, rename = "ControlAvailable")]
    control_available: bool,
}

#[derive(Debug, Deserialize)]
struct SwarmInspect {
    #[serde(rename = "JoinTokens")]
    join_tokens: JoinTokens,
}

#[derive(Debug, Deserialize)]
struct JoinTokens {
    #[serde(rename = "Worker")]
    worker: String,
    #[serde(rename = "Manager")]
    manager: String,
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    #[serde(default, rename = "Id")]
    id: String,
    #[serde(default, rename = "Name")]
    name: String,
    #[serde(default, rename = "Labels")]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExecInspect {
    #[serde(default, rename = "Running")]
    running: bool,
    #[serde(default, rename = "ExitCode")]
    exit_code: i64,
}

#[derive(Debug, Deserialize)]
struct ConfigSummary {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default, rename = "Spec")]
    spec: ConfigSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigSpec {
    #[serde(default, rename = "Name")]
    name: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerApiClient {
    /// Dials the engine API at `host` (`tcp://ip:port`), with TLS when
    /// `tls` material is supplied.
    pub fn connect(host: &str, tls: Option<&TlsMaterial>) -> SandparkResult<Self> {
        let address = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
            .or_else(|| host.strip_prefix("https://"))
            .unwrap_or(host);

        let mut builder = Client::builder().use_rustls_tls();
        let scheme = if let Some(material) = tls {
            let mut identity_pem = material.cert.clone();
            identity_pem.extend_from_slice(&material.key);

            builder = builder
                .add_root_certificate(
                    Certificate::from_pem(&material.ca)
                        .map_err(|e| SandparkError::Backend(format!("bad CA certificate: {}", e)))?,
                )
                .identity(
                    Identity::from_pem(&identity_pem)
                        .map_err(|e| SandparkError::Backend(format!("bad client identity: {}", e)))?,
                );
            "https"
        } else {
            "http"
        };

        let client = builder.build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let retrying = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            host: host.to_string(),
            base_url: format!("{}://{}", scheme, address),
            client,
            retrying,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, ENGINE_API_VERSION, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> SandparkResult<T> {
        let resp = self
            .retrying
            .get(self.url(path))
            .query(query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn wait_running(&self, id: &str, name: &str) -> SandparkResult<()> {
        let deadline = time::Instant::now() + CONTAINER_READY_TIMEOUT;

        loop {
            let inspect: ContainerInspect =
                self.get_json(&format!("containers/{}/json", id), &[]).await?;

            if inspect.state.running {
                tracing::info!(container = name, "container is now running");
                return Ok(());
            }

            if inspect.state.status == "exited" || inspect.state.status == "dead" {
                return Err(SandparkError::Backend(format!(
                    "container {} exited immediately: {}",
                    name, inspect.state.error
                )));
            }

            if time::Instant::now() >= deadline {
                return Err(SandparkError::Backend(format!(
                    "container {} not running after timeout, status: {}",
                    name, inspect.state.status
                )));
            }

            time::sleep(CONTAINER_READY_POLL_INTERVAL).await;
        }
    }

    async fn copy_if_set(
        &self,
        content: &[u8],
        file_name: &str,
        dest_dir: &str,
        container: &str,
    ) -> SandparkResult<()> {
        if content.is_empty() {
            return Ok(());
        }

        self.copy_to_container(container, dest_dir, file_name, Bytes::copy_from_slice(content))
            .await
    }

    async fn exec_wait(&self, exec_id: &str) -> SandparkResult<i64> {
        loop {
            let inspect: ExecInspect =
                self.get_json(&format!("exec/{}/json", exec_id), &[]).await?;
            if !inspect.running {
                return Ok(inspect.exit_code);
            }

            time::sleep(EXEC_POLL_INTERVAL).await;
        }
    }

    /// Creates the container, joins extra networks, places TLS material and
    /// starts it. Split out so `container_create` can roll the external
    /// volume back when any step fails.
    async fn create_and_start(
        &self,
        opts: &CreateContainerOpts,
        env: Vec<String>,
        memory_bytes: i64,
        nano_cpus: i64,
        cpuset: Option<String>,
        binds: Vec<String>,
    ) -> SandparkResult<()> {
        // Image selection: search first, pull when missing or forced.
        match self.image_search(&opts.image, IMAGE_SEARCH_LIMIT).await {
            Err(e) => {
                tracing::info!(image = %opts.image, error = %e, "image search failed, pulling");
                self.image_pull(&opts.image).await?;
            }
            Result::Ok(results) if results.is_empty() => {
                tracing::info!(image = %opts.image, "image not found, pulling");
                self.image_pull(&opts.image).await?;
            }
            Result::Ok(_) if opts.caps.always_pull => {
                tracing::info!(image = %opts.image, "always-pull set, pulling");
                self.image_pull(&opts.image).await?;
            }
            Result::Ok(_) => {}
        }

        let primary = opts
            .networks
            .first()
            .ok_or_else(|| SandparkError::Backend("no network for container".to_string()))?;

        let mut host_config = json!({
            "NetworkMode": primary,
            "Privileged": opts.privileged,
            "AutoRemove": true,
            "LogConfig": { "Type": "json-file", "Config": { "max-size": "10m", "max-file": "1" } },
            "NanoCpus": nano_cpus,
            "Memory": memory_bytes,
            "PidsLimit": opts.caps.pids_limit,
            "OomKillDisable": true,
            "Binds": binds,
        });
        if let Some(cpuset) = cpuset {
            host_config["CpusetCpus"] = json!(cpuset);
        }
        if let Some(external) = &opts.external_volume {
            host_config["StorageOpt"] = json!({ "size": external.size });
        }

        let mut endpoints = serde_json::Map::new();
        endpoints.insert(primary.clone(), json!({ "Aliases": opts.net_aliases }));

        let body = json!({
            "Hostname": opts.hostname,
            "Image": opts.image,
            "Tty": true,
            "OpenStdin": true,
            "AttachStdin": true,
            "AttachStdout": true,
            "AttachStderr": true,
            "Env": env,
            "Labels": opts.labels,
            "HostConfig": host_config,
            "NetworkingConfig": { "EndpointsConfig": endpoints },
        });

        let resp = self
            .client
            .post(self.url("containers/create"))
            .query(&[("name", opts.container_name.as_str())])
            .json(&body)
            .send()
            .await?;
        let created: Created = check(resp).await?.json().await?;

        // Extra networks attach after create; the primary came with it.
        for network in opts.networks.iter().skip(1) {
            self.network_connect(&created.id, network, None, &[]).await?;
        }

        self.copy_if_set(&opts.server_cert, "cert.pem", CONTAINER_CERT_DIR, &opts.container_name)
            .await?;
        self.copy_if_set(&opts.server_key, "key.pem", CONTAINER_CERT_DIR, &opts.container_name)
            .await?;
        self.copy_if_set(&opts.ca_cert, "ca.pem", CONTAINER_CERT_DIR, &opts.container_name)
            .await?;

        let resp = self
            .client
            .post(self.url(&format!("containers/{}/start", created.id)))
            .send()
            .await?;
        check(resp).await?;

        // Readiness wait is mandatory: the caller resizes the terminal right
        // after and races a container that has not reached Running yet.
        self.wait_running(&created.id, &opts.container_name).await
    }
}

async fn check(resp: reqwest::Response) -> SandparkResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() || status == StatusCode::SWITCHING_PROTOCOLS {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<EngineError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => SandparkError::NotFound(message),
        StatusCode::CONFLICT => SandparkError::Conflict(message),
        _ => SandparkError::Backend(format!("{}: {}", status, message)),
    })
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerBackend for DockerApiClient {
    async fn network_create(&self, name: &str, opts: NetworkCreateOpts) -> SandparkResult<()> {
        let mut body = json!({
            "Name": name,
            "Attachable": opts.attachable,
            "Labels": opts.labels,
        });
        if let Some(driver) = &opts.driver {
            body["Driver"] = json!(driver);
        }

        let resp = self
            .client
            .post(self.url("networks/create"))
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn network_connect(
        &self,
        container: &str,
        network: &str,
        ip: Option<&str>,
        aliases: &[String],
    ) -> SandparkResult<String> {
        let mut endpoint = json!({ "Aliases": aliases });
        if let Some(ip) = ip {
            endpoint["IPAMConfig"] = json!({ "IPv4Address": ip });
        }

        let resp = self
            .client
            .post(self.url(&format!("networks/{}/connect", network)))
            .json(&json!({ "Container": container, "EndpointConfig": endpoint }))
            .send()
            .await?;

        if let Err(e) = check(resp).await {
            // Re-connecting an already attached container is not an error.
            if !e.to_string().contains("already exists") {
                return Err(e);
            }
        }

        let inspect: ContainerInspect = self
            .get_json(&format!("containers/{}/json", container), &[])
            .await?;

        inspect
            .network_settings
            .networks
            .get(network)
            .map(|n| n.ip_address.clone())
            .ok_or_else(|| {
                SandparkError::Backend(format!(
                    "container {} connected to network {} but no IP address was assigned",
                    container, network
                ))
            })
    }

    async fn network_inspect(&self, name: &str) -> SandparkResult<NetworkResource> {
        let inspect: NetworkInspect = self.get_json(&format!("networks/{}", name), &[]).await?;
        Ok(NetworkResource {
            id: inspect.id,
            name: inspect.name,
            labels: inspect.labels,
        })
    }

    async fn network_delete(&self, name: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("networks/{}", name)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn network_disconnect(&self, container: &str, network: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("networks/{}/disconnect", network)))
            .json(&json!({ "Container": container, "Force": true }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn daemon_info(&self) -> SandparkResult<DaemonInfo> {
        let info: InfoResponse = self.get_json("info", &[]).await?;
        Ok(DaemonInfo {
            name: info.name,
            swarm_node_state: info.swarm.local_node_state,
            swarm_control_available: info.swarm.control_available,
        })
    }

    fn daemon_host(&self) -> String {
        self.host.clone()
    }

    async fn swarm_ports(&self) -> SandparkResult<(Vec<String>, Vec<u16>)> {
        let nodes: Vec<NodeSummary> = self.get_json("nodes", &[]).await?;
        let hosts = nodes
            .into_iter()
            .map(|n| n.description.hostname)
            .collect();

        let services: Vec<ServiceSummary> = self.get_json("services", &[]).await?;
        let ports = services
            .into_iter()
            .flat_map(|s| s.endpoint.ports)
            .map(|p| p.published_port)
            .collect();

        Ok((hosts, ports))
    }

    async fn published_ports(&self) -> SandparkResult<Vec<u16>> {
        let containers: Vec<ContainerSummary> = self.get_json("containers/json", &[]).await?;

        // Unpublished ports come back with a zero public port.
        Ok(containers
            .into_iter()
            .flat_map(|c| c.ports)
            .filter(|p| p.public_port != 0)
            .map(|p| p.public_port)
            .collect())
    }

    async fn container_create(&self, opts: CreateContainerOpts) -> SandparkResult<()> {
        let mut env = opts.envs.clone();
        env.push(format!("SESSION_ID={}", opts.session_id));

        if !opts.server_cert.is_empty() {
            env.push(format!("DOCKER_TLSCERT={}/cert.pem", CONTAINER_CERT_DIR));
        }
        if !opts.server_key.is_empty() {
            env.push(format!("DOCKER_TLSKEY={}/key.pem", CONTAINER_CERT_DIR));
        }
        if !opts.ca_cert.is_empty() {
            env.push(format!("DOCKER_TLSCACERT={}/ca.pem", CONTAINER_CERT_DIR));
        }
        let tls = !opts.server_cert.is_empty()
            || !opts.server_key.is_empty()
            || !opts.ca_cert.is_empty();
        env.push(format!("DOCKER_TLSENABLE={}", tls));
        env.push(format!("PWD_HOST_FQDN={}", opts.host_fqdn));

        let memory = clamp_memory(
            opts.limit_memory,
            opts.caps.default_memory,
            opts.caps.max_memory,
        );
        let memory_bytes = memory * MEGABYTE;

        let cpu = clamp_cpu(opts.limit_cpu, opts.caps.default_cpu, opts.caps.max_cpu);
        let nano_cpus = (cpu * 1e9) as i64;
        let cpuset = cpuset_for(cpu);
        tracing::info!(
            container = %opts.container_name,
            memory_mb = memory,
            cpu = cpu,
            cpuset = cpuset.as_deref().unwrap_or(""),
            "applying resource limits"
        );

        let mut binds = Vec::new();
        if let Some(external) = &opts.external_volume {
            let mut driver_opts = HashMap::new();
            driver_opts.insert("size".to_string(), external.size.clone());
            self.volume_create(
                &opts.container_name,
                Some(&external.driver),
                driver_opts,
                HashMap::new(),
            )
            .await?;
            binds.push(format!("{}:{}", opts.container_name, CONTAINER_DOCKER_DIR));
        }
        if let Some(user_volume) = &opts.user_volume {
            binds.push(format!("{}:{}", user_volume, CONTAINER_DATA_DIR));
        }

        let result = self
            .create_and_start(&opts, env, memory_bytes, nano_cpus, cpuset, binds)
            .await;

        // No stragglers: the volume created above must not outlive a failed
        // create.
        if result.is_err() && opts.external_volume.is_some() {
            if let Err(e) = self.volume_delete(&opts.container_name).await {
                tracing::warn!(
                    volume = %opts.container_name,
                    error = %e,
                    "failed to roll back external volume"
                );
            }
        }

        result
    }

    async fn container_ips(&self, name: &str) -> SandparkResult<HashMap<String, String>> {
        let inspect: ContainerInspect = self
            .get_json(&format!("containers/{}/json", name), &[])
            .await?;

        Ok(inspect
            .network_settings
            .networks
            .into_iter()
            .map(|(network, endpoint)| (network, endpoint.ip_address))
            .collect())
    }

    async fn container_stats(&self, name: &str) -> SandparkResult<ByteStream> {
        let resp = self
            .client
            .get(self.url(&format!("containers/{}/stats", name)))
            .query(&[("stream", "true")])
            .send()
            .await?;
        let resp = check(resp).await?;

        Ok(resp.bytes_stream().map_err(SandparkError::from).boxed())
    }

    async fn container_resize(&self, name: &str, rows: u32, cols: u32) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("containers/{}/resize", name)))
            .query(&[("h", rows.to_string()), ("w", cols.to_string())])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn container_rename(&self, old: &str, new: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("containers/{}/rename", old)))
            .query(&[("name", new)])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn container_delete(&self, name: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("containers/{}", name)))
            .query(&[("force", "true"), ("v", "true")])
            .send()
            .await?;
        check(resp).await?;

        // A named external volume may share the container's name; removal is
        // best-effort and ignored when absent.
        let _ = self.volume_delete(name).await;

        Ok(())
    }

    async fn container_attach(&self, name: &str) -> SandparkResult<Box<dyn AttachIo>> {
        let resp = self
            .client
            .post(self.url(&format!(
                "containers/{}/attach?stream=1&stdin=1&stdout=1&stderr=1&detachKeys={}",
                name, ATTACH_DETACH_KEYS
            )))
            .header(reqwest::header::CONNECTION, "Upgrade")
            .header(reqwest::header::UPGRADE, "tcp")
            .send()
            .await?;
        let resp = check(resp).await?;

        let upgraded = resp.upgrade().await?;
        Ok(Box::new(upgraded))
    }

    async fn exec(&self, name: &str, command: Vec<String>) -> SandparkResult<i64> {
        let resp = self
            .client
            .post(self.url(&format!("containers/{}/exec", name)))
            .json(&json!({ "Cmd": command, "AttachStdout": false, "AttachStderr": false }))
            .send()
            .await?;
        let created: Created = check(resp).await?.json().await?;

        let resp = self
            .client
            .post(self.url(&format!("exec/{}/start", created.id)))
            .json(&json!({ "Detach": true }))
            .send()
            .await?;
        check(resp).await?;

        self.exec_wait(&created.id).await
    }

    async fn exec_attach(
        &self,
        name: &str,
        command: Vec<String>,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> SandparkResult<i64> {
        let resp = self
            .client
            .post(self.url(&format!("containers/{}/exec", name)))
            .json(&json!({
                "Cmd": command,
                "AttachStdout": true,
                "AttachStderr": true,
                "Tty": true,
            }))
            .send()
            .await?;
        let created: Created = check(resp).await?.json().await?;

        let resp = self
            .client
            .post(self.url(&format!("exec/{}/start", created.id)))
            .header(reqwest::header::CONNECTION, "Upgrade")
            .header(reqwest::header::UPGRADE, "tcp")
            .json(&json!({ "Detach": false, "Tty": true }))
            .send()
            .await?;
        let resp = check(resp).await?;

        let mut upgraded = resp.upgrade().await?;
        let mut buf = [0u8; 8192];
        loop {
            let n = upgraded.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
        }
        out.flush().await?;

        self.exec_wait(&created.id).await
    }

    async fn copy_to_container(
        &self,
        name: &str,
        dest_dir: &str,
        file_name: &str,
        content: Bytes,
    ) -> SandparkResult<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o600);
        header.set_cksum();
        builder.append_data(&mut header, file_name, content.as_ref())?;
        let archive = builder.into_inner()?;

        let resp = self
            .client
            .put(self.url(&format!("containers/{}/archive", name)))
            .query(&[("path", dest_dir), ("copyUIDGID", "true")])
            .body(archive)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn copy_from_container(&self, name: &str, path: &str) -> SandparkResult<ByteStream> {
        let resp = self
            .retrying
            .get(self.url(&format!("containers/{}/archive", name)))
            .query(&[("path", path)])
            .send()
            .await?;
        let bytes = check(resp).await?.bytes().await?;

        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
        let mut entries = archive.entries()?;
        let mut entry = entries
            .next()
            .ok_or_else(|| SandparkError::Backend("empty archive".to_string()))??;

        if entry.header().entry_type().is_dir() {
            return Err(SandparkError::Backend(
                "copying directories is not supported".to_string(),
            ));
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        Ok(stream::once(future::ready(Result::Ok(Bytes::from(content)))).boxed())
    }

    async fn swarm_init(&self, advertise_addr: &str) -> SandparkResult<SwarmTokens> {
        let resp = self
            .client
            .post(self.url("swarm/init"))
            .json(&json!({ "AdvertiseAddr": advertise_addr, "ListenAddr": "0.0.0.0:2377" }))
            .send()
            .await?;
        check(resp).await?;

        let inspect: SwarmInspect = self.get_json("swarm", &[]).await?;
        Ok(SwarmTokens {
            manager: inspect.join_tokens.manager,
            worker: inspect.join_tokens.worker,
        })
    }

    async fn swarm_join(&self, addr: &str, token: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url("swarm/join"))
            .json(&json!({
                "RemoteAddrs": [addr],
                "JoinToken": token,
                "ListenAddr": "0.0.0.0:2377",
                "AdvertiseAddr": "eth0",
            }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn config_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
        data: Vec<u8>,
    ) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url("configs/create"))
            .json(&json!({
                "Name": name,
                "Labels": labels,
                "Data": base64::engine::general_purpose::STANDARD.encode(&data),
            }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn config_delete(&self, name: &str) -> SandparkResult<()> {
        let filters = json!({ "name": [name] }).to_string();
        let configs: Vec<ConfigSummary> = self
            .get_json("configs", &[("filters", filters.as_str())])
            .await?;

        let config = configs
            .into_iter()
            .find(|c| c.spec.name == name)
            .ok_or_else(|| SandparkError::NotFound(format!("config {}", name)))?;

        let resp = self
            .client
            .delete(self.url(&format!("configs/{}", config.id)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn volume_create(
        &self,
        name: &str,
        driver: Option<&str>,
        driver_opts: HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> SandparkResult<()> {
        let mut body = json!({
            "Name": name,
            "DriverOpts": driver_opts,
            "Labels": labels,
        });
        if let Some(driver) = driver {
            body["Driver"] = json!(driver);
        }

        let resp = self
            .client
            .post(self.url("volumes/create"))
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn volume_delete(&self, name: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("volumes/{}", name)))
            .query(&[("force", "true")])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn image_search(&self, term: &str, limit: usize) -> SandparkResult<Vec<String>> {
        let limit = limit.to_string();
        let results: Vec<SearchResult> = self
            .get_json("images/search", &[("term", term), ("limit", limit.as_str())])
            .await?;

        Ok(results.into_iter().map(|r| r.name).collect())
    }

    async fn image_pull(&self, image: &str) -> SandparkResult<()> {
        let resp = self
            .client
            .post(self.url("images/create"))
            .query(&[("fromImage", image)])
            .send()
            .await?;
        let resp = check(resp).await?;

        // The pull endpoint streams progress JSON until the pull completes;
        // drain it.
        let mut progress = resp.bytes_stream();
        while let Some(chunk) = progress.next().await {
            chunk?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Serves one canned response per connection, engine-API style.
    async fn spawn_stub(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Result::Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;

                    let resp = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(resp.as_bytes()).await;
                });
            }
        });

        format!("tcp://{}", addr)
    }

    #[tokio::test]
    async fn test_wait_running_fails_fast_on_exited_container() -> anyhow::Result<()> {
        let host = spawn_stub(
            "200 OK",
            r#"{"State":{"Running":false,"Status":"exited","Error":"boom"}}"#,
        )
        .await;
        let client = DockerApiClient::connect(&host, None)?;

        let started = std::time::Instant::now();
        let err = client.wait_running("abc", "node1_test0000").await.unwrap_err();

        assert!(matches!(err, SandparkError::Backend(_)));
        assert!(err.to_string().contains("boom"));
        assert!(started.elapsed() < CONTAINER_READY_TIMEOUT);
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_running_returns_once_running() -> anyhow::Result<()> {
        let host = spawn_stub("200 OK", r#"{"State":{"Running":true,"Status":"running"}}"#).await;
        let client = DockerApiClient::connect(&host, None)?;

        let started = std::time::Instant::now();
        client.wait_running("abc", "node1_test0000").await?;
        assert!(started.elapsed() < CONTAINER_READY_TIMEOUT);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_entities_map_to_not_found() -> anyhow::Result<()> {
        let host = spawn_stub("404 Not Found", r#"{"message":"no such container"}"#).await;
        let client = DockerApiClient::connect(&host, None)?;

        let err = client.container_ips("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("no such container"));
        Ok(())
    }

    #[tokio::test]
    async fn test_daemon_info_reduces_swarm_state() -> anyhow::Result<()> {
        let host = spawn_stub(
            "200 OK",
            r#"{"Name":"node1","Swarm":{"LocalNodeState":"active","ControlAvailable":true}}"#,
        )
        .await;
        let client = DockerApiClient::connect(&host, None)?;

        let info = client.daemon_info().await?;
        assert_eq!(info.name, "node1");
        assert_eq!(info.swarm_node_state, "active");
        assert!(info.swarm_control_available);
        Ok(())
    }
}
