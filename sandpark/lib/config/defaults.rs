use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// The default playground domain.
pub const DEFAULT_DOMAIN: &str = "localhost";

/// The default Docker-in-Docker image for new instances.
pub const DEFAULT_DIND_IMAGE: &str = "franela/dind:latest";

/// The default path of the entity graph snapshot file.
pub const DEFAULT_SESSION_FILE: &str = "./sessions/session";

/// The default maximum session duration.
pub const DEFAULT_SESSION_DURATION: &str = "4h";

/// The default per-instance CPU limit, in cores.
pub const DEFAULT_LIMIT_CPU: f64 = 1.0;

/// The default maximum per-instance CPU limit, in cores.
pub const DEFAULT_MAX_CPU: f64 = 4.0;

/// The default per-instance memory limit, in MB.
pub const DEFAULT_LIMIT_MEMORY: i64 = 2048;

/// The default maximum per-instance memory limit, in MB.
pub const DEFAULT_MAX_MEMORY: i64 = 8192;

/// The default PIDs limit applied to every sandbox container.
pub const DEFAULT_MAX_PIDS: i64 = 1000;

/// The default maximum load average before `/ping` starts failing.
pub const DEFAULT_MAX_LOAD_AVG: f64 = 100.0;

/// The default user data directory, one subdirectory per session.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// The default SSH host key path.
pub const DEFAULT_SSH_KEY_PATH: &str = "/etc/ssh/ssh_host_rsa_key";

/// The default Let's Encrypt certificate cache directory.
pub const DEFAULT_LETSENCRYPT_CERTS_DIR: &str = "./certs";

/// The default container daemon endpoint. The engine API must be reachable
/// over TCP.
pub const DEFAULT_DOCKER_HOST: &str = "tcp://127.0.0.1:2375";

/// The default size hint for external DinD volumes.
pub const DEFAULT_DIND_VOLUME_SIZE: &str = "5G";

/// The directory inside a sandbox container where TLS material is placed.
pub const CONTAINER_CERT_DIR: &str = "/opt/pwd/certs";

/// The mount point of the per-session user volume inside a sandbox container.
pub const CONTAINER_DATA_DIR: &str = "/data";

/// The mount point of the external DinD volume inside a sandbox container.
pub const CONTAINER_DOCKER_DIR: &str = "/var/lib/docker";

/// How long to wait for a created container to report `Running`.
pub const CONTAINER_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// The interval between readiness inspections of a starting container.
pub const CONTAINER_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The scheduler tick interval.
pub const SCHEDULER_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The default per-run deadline of a probing task.
pub const TASK_RUN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the scheduler waits for in-flight work on shutdown.
pub const SCHEDULER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The per-instance deadline when a closing session deletes its instances.
pub const INSTANCE_DELETE_TIMEOUT: Duration = Duration::from_secs(30);

/// The non-TLS port of a nested container daemon.
pub const DIND_PORT: u16 = 2375;

/// The TLS port of a nested container daemon.
pub const DIND_TLS_PORT: u16 = 2376;

/// The registry search result limit used before falling back to a pull.
pub const IMAGE_SEARCH_LIMIT: usize = 5;
