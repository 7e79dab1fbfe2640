//! Container daemon capability surface.
//!
//! [`ContainerBackend`] abstracts the container daemon the way the core and
//! the provisioners consume it; [`DockerApiClient`] implements it against the
//! Docker Engine HTTP API. [`LocalCachedFactory`] hands out memoized clients:
//! one per session (the host daemon) and one per instance (the nested daemon,
//! dialed with the instance's TLS material).

mod engine;
mod factory;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use typed_builder::TypedBuilder;

use crate::SandparkResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use engine::*;
pub use factory::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A stream of raw bytes from the daemon (stats frames, file contents).
pub type ByteStream = BoxStream<'static, SandparkResult<Bytes>>;

/// A bidirectional raw stream, as handed back by a container attach.
pub trait AttachIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AttachIo for T {}

/// Options for creating a network.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct NetworkCreateOpts {
    /// The network driver; the daemon default when `None`.
    #[builder(default)]
    pub driver: Option<String>,

    /// Whether standalone containers may attach.
    #[builder(default = true)]
    pub attachable: bool,

    /// Labels applied to the network.
    #[builder(default)]
    pub labels: HashMap<String, String>,
}

/// Options for creating a sandbox container.
///
/// Resource caps arrive alongside the requested limits so the backend can
/// clamp without reaching into configuration.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct CreateContainerOpts {
    /// The image to run.
    pub image: String,

    /// The owning session id, exported as `SESSION_ID` and used as the
    /// primary network mode.
    pub session_id: String,

    /// The container name.
    pub container_name: String,

    /// The hostname inside the container.
    pub hostname: String,

    /// PEM server certificate copied into the container.
    #[builder(default)]
    pub server_cert: Vec<u8>,

    /// PEM server key copied into the container.
    #[builder(default)]
    pub server_key: Vec<u8>,

    /// PEM CA certificate copied into the container.
    #[builder(default)]
    pub ca_cert: Vec<u8>,

    /// Whether the container runs privileged.
    #[builder(default = true)]
    pub privileged: bool,

    /// The externally reachable FQDN, exported as `PWD_HOST_FQDN`.
    #[builder(default)]
    pub host_fqdn: String,

    /// Labels applied to the container.
    #[builder(default)]
    pub labels: HashMap<String, String>,

    /// Networks to join; the first is the primary and becomes the network
    /// mode.
    pub networks: Vec<String>,

    /// Aliases on the primary network.
    #[builder(default)]
    pub net_aliases: Vec<String>,

    /// Host path bind-mounted at `/data`, when user data is enabled.
    #[builder(default)]
    pub user_volume: Option<String>,

    /// External DinD volume to create and mount at `/var/lib/docker`.
    #[builder(default)]
    pub external_volume: Option<ExternalVolumeOpts>,

    /// Requested CPU limit in cores; the default cap applies when zero.
    #[builder(default)]
    pub limit_cpu: f64,

    /// Requested memory limit in MB; the default cap applies when zero.
    #[builder(default)]
    pub limit_memory: i64,

    /// Caller-supplied environment entries.
    #[builder(default)]
    pub envs: Vec<String>,

    /// Resource caps and daemon policy derived from configuration.
    #[builder(default)]
    pub caps: ResourceCaps,
}

/// An external volume request backing `/var/lib/docker`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ExternalVolumeOpts {
    /// The volume driver.
    pub driver: String,

    /// The size hint passed to the driver.
    pub size: String,
}

/// Resource caps and image policy threaded from configuration into container
/// creation.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ResourceCaps {
    /// Default CPU limit in cores, applied when the request carries none.
    pub default_cpu: f64,

    /// Maximum CPU limit in cores.
    pub max_cpu: f64,

    /// Default memory limit in MB, applied when the request carries none.
    pub default_memory: i64,

    /// Maximum memory limit in MB.
    pub max_memory: i64,

    /// The PIDs limit applied to the container.
    pub pids_limit: i64,

    /// Whether to pull the image even when present locally.
    #[builder(default)]
    pub always_pull: bool,
}

/// Join tokens returned by a swarm init.
#[derive(Debug, Clone)]
pub struct SwarmTokens {
    /// Token for joining as a manager.
    pub manager: String,

    /// Token for joining as a worker.
    pub worker: String,
}

/// A subset of the daemon's `/info` the probing tasks care about.
#[derive(Debug, Clone, Default)]
pub struct DaemonInfo {
    /// The daemon's node name.
    pub name: String,

    /// Swarm membership state: "inactive", "pending", "active", ...
    pub swarm_node_state: String,

    /// Whether this node is a swarm manager.
    pub swarm_control_available: bool,
}

/// A network as reported by the daemon.
#[derive(Debug, Clone, Default)]
pub struct NetworkResource {
    /// The daemon-assigned network id.
    pub id: String,

    /// The network name.
    pub name: String,

    /// Labels on the network.
    pub labels: HashMap<String, String>,
}

/// The container daemon capability surface.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Creates a network named `name`.
    async fn network_create(&self, name: &str, opts: NetworkCreateOpts) -> SandparkResult<()>;

    /// Connects `container` to `network`, optionally with a fixed IP and
    /// aliases, and returns the container's IP on that network.
    async fn network_connect(
        &self,
        container: &str,
        network: &str,
        ip: Option<&str>,
        aliases: &[String],
    ) -> SandparkResult<String>;

    /// Inspects a network.
    async fn network_inspect(&self, name: &str) -> SandparkResult<NetworkResource>;

    /// Removes a network.
    async fn network_delete(&self, name: &str) -> SandparkResult<()>;

    /// Disconnects `container` from `network`, forcibly.
    async fn network_disconnect(&self, container: &str, network: &str) -> SandparkResult<()>;

    /// The daemon's `/info`, reduced to what probing needs.
    async fn daemon_info(&self) -> SandparkResult<DaemonInfo>;

    /// The endpoint this client dials.
    fn daemon_host(&self) -> String;

    /// Hostnames of swarm nodes and the ports published by swarm services.
    async fn swarm_ports(&self) -> SandparkResult<(Vec<String>, Vec<u16>)>;

    /// Host-published ports across all running containers.
    async fn published_ports(&self) -> SandparkResult<Vec<u16>>;

    /// Creates a sandbox container per the normative creation algorithm and
    /// waits for it to report `Running`.
    async fn container_create(&self, opts: CreateContainerOpts) -> SandparkResult<()>;

    /// The container's IP address per attached network.
    async fn container_ips(&self, name: &str) -> SandparkResult<HashMap<String, String>>;

    /// Opens the daemon's streaming stats feed for a container.
    async fn container_stats(&self, name: &str) -> SandparkResult<ByteStream>;

    /// Resizes the container's TTY.
    async fn container_resize(&self, name: &str, rows: u32, cols: u32) -> SandparkResult<()>;

    /// Renames a container.
    async fn container_rename(&self, old: &str, new: &str) -> SandparkResult<()>;

    /// Force-removes a container together with its anonymous volumes.
    async fn container_delete(&self, name: &str) -> SandparkResult<()>;

    /// Attaches to the container's TTY, returning the raw bidirectional
    /// stream.
    async fn container_attach(&self, name: &str) -> SandparkResult<Box<dyn AttachIo>>;

    /// Runs `command` detached inside the container and returns its exit
    /// code.
    async fn exec(&self, name: &str, command: Vec<String>) -> SandparkResult<i64>;

    /// Runs `command` inside the container, copying its TTY output into
    /// `out`, and returns the exit code.
    async fn exec_attach(
        &self,
        name: &str,
        command: Vec<String>,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> SandparkResult<i64>;

    /// Places `content` as `file_name` under `dest_dir` inside the
    /// container.
    async fn copy_to_container(
        &self,
        name: &str,
        dest_dir: &str,
        file_name: &str,
        content: Bytes,
    ) -> SandparkResult<()>;

    /// Streams a single file out of the container. Directories are rejected.
    async fn copy_from_container(&self, name: &str, path: &str) -> SandparkResult<ByteStream>;

    /// Initializes a swarm, returning its join tokens.
    async fn swarm_init(&self, advertise_addr: &str) -> SandparkResult<SwarmTokens>;

    /// Joins an existing swarm.
    async fn swarm_join(&self, addr: &str, token: &str) -> SandparkResult<()>;

    /// Creates a swarm config entry.
    async fn config_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
        data: Vec<u8>,
    ) -> SandparkResult<()>;

    /// Removes a swarm config entry by name.
    async fn config_delete(&self, name: &str) -> SandparkResult<()>;

    /// Creates a named volume.
    async fn volume_create(
        &self,
        name: &str,
        driver: Option<&str>,
        driver_opts: HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> SandparkResult<()>;

    /// Force-removes a named volume.
    async fn volume_delete(&self, name: &str) -> SandparkResult<()>;

    /// Searches the registry for `term`, returning matching image names.
    async fn image_search(&self, term: &str, limit: usize) -> SandparkResult<Vec<String>>;

    /// Pulls an image.
    async fn image_pull(&self, image: &str) -> SandparkResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Clamps a requested CPU limit into `[0, max]`, falling back to the default
/// when the request carries none.
pub fn clamp_cpu(requested: f64, default: f64, max: f64) -> f64 {
    let cpu = if requested > 0.0 { requested } else { default };
    cpu.clamp(0.0, max)
}

/// Clamps a requested memory limit (MB) into `[0, max]`, falling back to the
/// default when the request carries none.
pub fn clamp_memory(requested: i64, default: i64, max: i64) -> i64 {
    let memory = if requested > 0 { requested } else { default };
    memory.clamp(0, max)
}

/// The cpuset string for a CPU limit: cores `0..floor(cpu)-1`. `None` below
/// one full core.
pub fn cpuset_for(cpu: f64) -> Option<String> {
    let cores = cpu as i64;
    match cores {
        n if n <= 0 => None,
        1 => Some("0".to_string()),
        n => Some(format!("0-{}", n - 1)),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_clamped_to_playground_max() {
        assert_eq!(clamp_cpu(0.0, 1.0, 4.0), 1.0);
        assert_eq!(clamp_cpu(2.5, 1.0, 4.0), 2.5);
        assert_eq!(clamp_cpu(16.0, 1.0, 4.0), 4.0);
    }

    #[test]
    fn test_memory_is_clamped_to_playground_max() {
        assert_eq!(clamp_memory(0, 2048, 8192), 2048);
        assert_eq!(clamp_memory(4096, 2048, 8192), 4096);
        assert_eq!(clamp_memory(65536, 2048, 8192), 8192);
    }

    #[test]
    fn test_cpuset_shape() {
        assert_eq!(cpuset_for(0.5), None);
        assert_eq!(cpuset_for(1.0), Some("0".to_string()));
        assert_eq!(cpuset_for(1.9), Some("0".to_string()));
        assert_eq!(cpuset_for(4.0), Some("0-3".to_string()));
    }
}
