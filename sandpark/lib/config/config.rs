//! Startup configuration.
//!
//! Every flag is mirrored by a `PWD_*` environment variable ("pwd" being the
//! playground daemon prefix carried on the wire as well, e.g. in
//! `PWD_HOST_FQDN`). The parsed [`Args`] are resolved into an immutable
//! [`Config`] value that is threaded into every constructor; there is no
//! process-wide mutable configuration.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use getset::Getters;

use crate::{utils::parse_duration, SandparkError, SandparkResult};

use super::defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `sandpark` serves throwaway Docker-in-Docker playground sessions
#[derive(Debug, Parser)]
#[command(name = "sandpark", author, version)]
pub struct Args {
    /// HTTP listen port
    #[arg(long, env = "PWD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Playground domain
    #[arg(long, env = "PWD_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub domain: String,

    /// Path where the session snapshot file is stored
    #[arg(long = "session-file", env = "PWD_SESSION_FILE", default_value = DEFAULT_SESSION_FILE)]
    pub session_file: PathBuf,

    /// Maximum session duration per user (e.g. "4h")
    #[arg(long = "max-session-duration", env = "PWD_MAX_SESSION_DURATION", default_value = DEFAULT_SESSION_DURATION)]
    pub max_session_duration: String,

    /// Default Docker-in-Docker image
    #[arg(long = "default-dind-image", env = "PWD_DEFAULT_DIND_IMAGE", default_value = DEFAULT_DIND_IMAGE)]
    pub default_dind_image: String,

    /// Always pull instance images, even when present locally
    #[arg(long = "always-pull", env = "PWD_ALWAYS_PULL")]
    pub always_pull: bool,

    /// Default per-instance CPU limit, in cores
    #[arg(long = "default-limit-cpu", env = "PWD_DEFAULT_LIMIT_CPU", default_value_t = DEFAULT_LIMIT_CPU)]
    pub default_limit_cpu: f64,

    /// Maximum per-instance CPU limit, in cores
    #[arg(long = "default-max-cpu", env = "PWD_DEFAULT_MAX_CPU", default_value_t = DEFAULT_MAX_CPU)]
    pub default_max_cpu: f64,

    /// Default per-instance memory limit, in MB
    #[arg(long = "default-limit-memory", env = "PWD_DEFAULT_LIMIT_MEMORY", default_value_t = DEFAULT_LIMIT_MEMORY)]
    pub default_limit_memory: i64,

    /// Maximum per-instance memory limit, in MB
    #[arg(long = "default-max-memory", env = "PWD_DEFAULT_MAX_MEMORY", default_value_t = DEFAULT_MAX_MEMORY)]
    pub default_max_memory: i64,

    /// PIDs limit applied to every sandbox container
    #[arg(long = "default-max-pids", env = "PWD_DEFAULT_MAX_PIDS", default_value_t = DEFAULT_MAX_PIDS)]
    pub default_max_pids: i64,

    /// Maximum allowed load average before failing ping requests
    #[arg(long = "max-load-avg", env = "PWD_MAX_LOAD_AVG", default_value_t = DEFAULT_MAX_LOAD_AVG)]
    pub max_load_avg: f64,

    /// Maximum instances per session (0 = unlimited)
    #[arg(long = "max-instances", env = "PWD_MAX_INSTANCES", default_value_t = 0)]
    pub max_instances: usize,

    /// Cookies secret
    #[arg(long = "cookies-secret", env = "PWD_COOKIES_SECRET", default_value = "sandpark-cookies")]
    pub cookies_secret: String,

    /// Cookies validation hash key
    #[arg(long = "cookies-key-hash", env = "PWD_COOKIES_KEY_HASH", default_value = "")]
    pub cookies_hash_key: String,

    /// Cookies encryption key
    #[arg(long = "cookies-key-encrypt", env = "PWD_COOKIES_KEY_ENCRYPT", default_value = "")]
    pub cookies_block_key: String,

    /// SSH host private key to use
    #[arg(long = "ssh-key-file", env = "PWD_SSH_KEY_FILE", default_value = DEFAULT_SSH_KEY_PATH)]
    pub ssh_key_path: PathBuf,

    /// Enable Let's Encrypt for TLS certificates
    #[arg(long = "letsencrypt-enable", env = "PWD_LETS_ENCRYPT_ENABLE")]
    pub letsencrypt: bool,

    /// Path where Let's Encrypt certificates are cached
    #[arg(long = "letsencrypt-certs-dir", env = "PWD_LETS_ENCRYPT_CERTS_DIR", default_value = DEFAULT_LETSENCRYPT_CERTS_DIR)]
    pub letsencrypt_certs_dir: PathBuf,

    /// Disable Windows instance support
    #[arg(long = "windows-disable", env = "PWD_WINDOWS_DISABLE", default_value_t = true)]
    pub no_windows: bool,

    /// Force TLS connections to nested container daemons
    #[arg(long = "docker-use-tls", env = "PWD_DOCKER_USE_TLS")]
    pub force_tls: bool,

    /// Container daemon endpoint (the engine API must be reachable over TCP)
    #[arg(long = "docker-host", env = "PWD_DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    pub docker_host: String,

    /// Use an external DinD volume through a volume driver
    #[arg(long = "docker-use-ext-volume", env = "PWD_DOCKER_USE_EXTERNAL_VOLUME")]
    pub external_dind_volume: bool,

    /// Volume driver backing external DinD volumes
    #[arg(long = "docker-ext-volume-driver", env = "PWD_DOCKER_EXTERNAL_VOLUME_DRIVER", default_value = "xfsvol")]
    pub external_dind_volume_driver: String,

    /// External DinD volume size
    #[arg(long = "docker-ext-volume-size", env = "PWD_DOCKER_EXTERNAL_VOLUME_SIZE", default_value = DEFAULT_DIND_VOLUME_SIZE)]
    pub external_dind_volume_size: String,

    /// Data directory, as seen by sandpark, storing user persistent data
    #[arg(long = "data-dir", env = "PWD_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir_user: PathBuf,

    /// Data directory as seen by the container daemon host, when different
    #[arg(long = "data-dir-host", env = "PWD_DATA_DIR_HOST")]
    pub data_dir_host: Option<PathBuf>,

    /// Token validating the admin user on admin endpoints
    #[arg(long = "admin-token", env = "PWD_ADMIN_TOKEN", default_value = "")]
    pub admin_token: String,

    /// OAuth Docker provider client id
    #[arg(long = "oauth-docker-client-id", env = "PWD_OAUTH_DOCKER_CLIENT_ID", default_value = "")]
    pub oauth_docker_client_id: String,

    /// OAuth Docker provider client secret
    #[arg(long = "oauth-docker-client-secret", env = "PWD_OAUTH_DOCKER_CLIENT_SECRET", default_value = "")]
    pub oauth_docker_client_secret: String,

    /// OAuth GitHub provider client id
    #[arg(long = "oauth-github-client-id", env = "PWD_OAUTH_GITHUB_CLIENT_ID", default_value = "")]
    pub oauth_github_client_id: String,

    /// OAuth GitHub provider client secret
    #[arg(long = "oauth-github-client-secret", env = "PWD_OAUTH_GITHUB_CLIENT_SECRET", default_value = "")]
    pub oauth_github_client_secret: String,

    /// OAuth Google provider client id
    #[arg(long = "oauth-google-client-id", env = "PWD_OAUTH_GOOGLE_CLIENT_ID", default_value = "")]
    pub oauth_google_client_id: String,

    /// OAuth Google provider client secret
    #[arg(long = "oauth-google-client-secret", env = "PWD_OAUTH_GOOGLE_CLIENT_SECRET", default_value = "")]
    pub oauth_google_client_secret: String,

    /// OAuth Azure provider client id
    #[arg(long = "oauth-azure-client-id", env = "PWD_OAUTH_AZURE_CLIENT_ID", default_value = "")]
    pub oauth_azure_client_id: String,

    /// OAuth Azure provider client secret
    #[arg(long = "oauth-azure-client-secret", env = "PWD_OAUTH_AZURE_CLIENT_SECRET", default_value = "")]
    pub oauth_azure_client_secret: String,

    /// OAuth Azure provider tenant id
    #[arg(long = "oauth-azure-tenant-id", env = "PWD_OAUTH_AZURE_TENANT_ID", default_value = "common")]
    pub oauth_azure_tenant_id: String,

    /// OAuth OIDC provider client id
    #[arg(long = "oauth-oidc-client-id", env = "PWD_OAUTH_OIDC_CLIENT_ID", default_value = "")]
    pub oauth_oidc_client_id: String,

    /// OAuth OIDC provider client secret
    #[arg(long = "oauth-oidc-client-secret", env = "PWD_OAUTH_OIDC_CLIENT_SECRET", default_value = "")]
    pub oauth_oidc_client_secret: String,

    /// OAuth OIDC provider endpoint
    #[arg(long = "oauth-oidc-endpoint", env = "PWD_OAUTH_OIDC_ENDPOINT", default_value = "")]
    pub oauth_oidc_endpoint: String,

    /// Operate in unsafe mode (development only). Allows callers to pick the
    /// networks an instance joins.
    #[arg(long = "unsafe-mode", env = "PWD_UNSAFE_MODE")]
    pub unsafe_mode: bool,
}

/// Resolved, immutable runtime configuration.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Config {
    /// HTTP listen port.
    port: u16,

    /// The playground domain served by default.
    domain: String,

    /// Path of the entity graph snapshot file.
    session_file: PathBuf,

    /// Maximum session duration per user.
    max_session_duration: Duration,

    /// Default Docker-in-Docker image.
    default_dind_image: String,

    /// Always pull instance images.
    always_pull: bool,

    /// Default per-instance CPU limit, in cores.
    default_limit_cpu: f64,

    /// Maximum per-instance CPU limit, in cores.
    default_max_cpu: f64,

    /// Default per-instance memory limit, in MB.
    default_limit_memory: i64,

    /// Maximum per-instance memory limit, in MB.
    default_max_memory: i64,

    /// PIDs limit applied to every sandbox container.
    default_max_pids: i64,

    /// Maximum allowed load average before failing ping requests.
    max_load_avg: f64,

    /// Maximum instances per session, zero meaning unlimited.
    max_instances: usize,

    /// Cookie secret material for the adapter.
    cookies_secret: String,

    /// SSH host private key path.
    ssh_key_path: PathBuf,

    /// Whether Let's Encrypt termination is enabled at the adapter.
    letsencrypt: bool,

    /// Let's Encrypt certificate cache directory.
    letsencrypt_certs_dir: PathBuf,

    /// Whether Windows instance support is disabled.
    no_windows: bool,

    /// Force TLS connections to nested container daemons.
    force_tls: bool,

    /// Container daemon endpoint.
    docker_host: String,

    /// Whether DinD storage is backed by an external volume driver.
    external_dind_volume: bool,

    /// Volume driver backing external DinD volumes.
    external_dind_volume_driver: String,

    /// External DinD volume size hint.
    external_dind_volume_size: String,

    /// User data directory, as seen by sandpark.
    data_dir_user: PathBuf,

    /// User data directory, as seen by the container daemon host.
    data_dir_host: PathBuf,

    /// Admin endpoint token.
    admin_token: String,

    /// OAuth provider credentials parsed from flags, keyed by provider name.
    oauth_providers: Vec<(String, OAuthProvider)>,

    /// Whether unsafe development features are enabled.
    unsafe_mode: bool,
}

/// OAuth client credentials for one external provider.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OAuthProvider {
    /// The OAuth client id.
    pub client_id: String,

    /// The OAuth client secret.
    pub client_secret: String,

    /// Provider-specific extra material (Azure tenant, OIDC endpoint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Args {
    /// Resolves the parsed flags into a [`Config`], validating durations and
    /// derived values. Failures here are fatal.
    pub fn into_config(self) -> SandparkResult<Config> {
        let max_session_duration = parse_duration(&self.max_session_duration)
            .map_err(|e| SandparkError::Fatal(format!("bad max session duration: {}", e)))?;

        if max_session_duration.is_zero() {
            return Err(SandparkError::Fatal(
                "max session duration must be positive".to_string(),
            ));
        }

        let data_dir_host = self
            .data_dir_host
            .unwrap_or_else(|| self.data_dir_user.clone());

        let mut oauth_providers = Vec::new();
        if !self.oauth_docker_client_id.is_empty() && !self.oauth_docker_client_secret.is_empty() {
            oauth_providers.push((
                "docker".to_string(),
                OAuthProvider {
                    client_id: self.oauth_docker_client_id,
                    client_secret: self.oauth_docker_client_secret,
                    extra: None,
                },
            ));
        }
        if !self.oauth_github_client_id.is_empty() && !self.oauth_github_client_secret.is_empty() {
            oauth_providers.push((
                "github".to_string(),
                OAuthProvider {
                    client_id: self.oauth_github_client_id,
                    client_secret: self.oauth_github_client_secret,
                    extra: None,
                },
            ));
        }
        if !self.oauth_google_client_id.is_empty() && !self.oauth_google_client_secret.is_empty() {
            oauth_providers.push((
                "google".to_string(),
                OAuthProvider {
                    client_id: self.oauth_google_client_id,
                    client_secret: self.oauth_google_client_secret,
                    extra: None,
                },
            ));
        }
        if !self.oauth_azure_client_id.is_empty() && !self.oauth_azure_client_secret.is_empty() {
            oauth_providers.push((
                "azure".to_string(),
                OAuthProvider {
                    client_id: self.oauth_azure_client_id,
                    client_secret: self.oauth_azure_client_secret,
                    extra: Some(self.oauth_azure_tenant_id),
                },
            ));
        }
        if !self.oauth_oidc_client_id.is_empty()
            && !self.oauth_oidc_client_secret.is_empty()
            && !self.oauth_oidc_endpoint.is_empty()
        {
            oauth_providers.push((
                "oidc".to_string(),
                OAuthProvider {
                    client_id: self.oauth_oidc_client_id,
                    client_secret: self.oauth_oidc_client_secret,
                    extra: Some(self.oauth_oidc_endpoint),
                },
            ));
        }

        Ok(Config {
            port: self.port,
            domain: self.domain,
            session_file: self.session_file,
            max_session_duration,
            default_dind_image: self.default_dind_image,
            always_pull: self.always_pull,
            default_limit_cpu: self.default_limit_cpu,
            default_max_cpu: self.default_max_cpu,
            default_limit_memory: self.default_limit_memory,
            default_max_memory: self.default_max_memory,
            default_max_pids: self.default_max_pids,
            max_load_avg: self.max_load_avg,
            max_instances: self.max_instances,
            cookies_secret: self.cookies_secret,
            ssh_key_path: self.ssh_key_path,
            letsencrypt: self.letsencrypt,
            letsencrypt_certs_dir: self.letsencrypt_certs_dir,
            no_windows: self.no_windows,
            force_tls: self.force_tls,
            docker_host: self.docker_host,
            external_dind_volume: self.external_dind_volume,
            external_dind_volume_driver: self.external_dind_volume_driver,
            external_dind_volume_size: self.external_dind_volume_size,
            data_dir_user: self.data_dir_user,
            data_dir_host,
            admin_token: self.admin_token,
            oauth_providers,
            unsafe_mode: self.unsafe_mode,
        })
    }
}

impl Config {
    /// The host-side directory backing a session's `/data` mount.
    pub fn session_data_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir_host.join(session_id)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sandpark"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_resolve() -> anyhow::Result<()> {
        let config = args(&[]).into_config()?;
        assert_eq!(*config.get_port(), DEFAULT_PORT);
        assert_eq!(config.get_domain(), DEFAULT_DOMAIN);
        assert_eq!(
            *config.get_max_session_duration(),
            Duration::from_secs(4 * 3600)
        );
        assert_eq!(config.get_data_dir_host(), config.get_data_dir_user());
        assert!(config.get_oauth_providers().is_empty());
        Ok(())
    }

    #[test]
    fn test_bad_duration_is_fatal() {
        let err = args(&["--max-session-duration", "four hours"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, SandparkError::Fatal(_)));
    }

    #[test]
    fn test_oauth_providers_require_both_halves() -> anyhow::Result<()> {
        let config = args(&["--oauth-github-client-id", "abc"]).into_config()?;
        assert!(config.get_oauth_providers().is_empty());

        let config = args(&[
            "--oauth-github-client-id",
            "abc",
            "--oauth-github-client-secret",
            "xyz",
        ])
        .into_config()?;
        assert_eq!(config.get_oauth_providers().len(), 1);
        assert_eq!(config.get_oauth_providers()[0].0, "github");
        Ok(())
    }

    #[test]
    fn test_session_data_dir() -> anyhow::Result<()> {
        let config = args(&["--data-dir", "/var/pwd"]).into_config()?;
        assert_eq!(
            config.session_data_dir("abcd1234"),
            PathBuf::from("/var/pwd/abcd1234")
        );
        Ok(())
    }
}
