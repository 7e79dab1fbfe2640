//! Nested-container (DinD) instance provisioner.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::Config,
    docker::{BackendFactory, CreateContainerOpts, ExternalVolumeOpts, ResourceCaps},
    types::{Instance, InstanceConfig, Session},
    utils, SandparkError, SandparkResult,
};

use super::{classify_capacity, InstanceProvisioner, INSTANCE_KIND_LINUX};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// [`InstanceProvisioner`] realizing instances as privileged nested-daemon
/// containers on the session's host daemon.
pub struct DindProvisioner {
    config: Arc<Config>,
    factory: Arc<dyn BackendFactory>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DindProvisioner {
    /// Creates a provisioner over the host daemon reached through `factory`.
    pub fn new(config: Arc<Config>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { config, factory }
    }

    /// Ensures the session's user volume directory exists, world-readable so
    /// the daemon can bind-mount it.
    async fn ensure_user_volume(&self, session_id: &str) -> SandparkResult<String> {
        let dir = self.config.session_data_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).await?;
        }

        Ok(dir.to_string_lossy().into_owned())
    }

    fn resource_caps(&self) -> ResourceCaps {
        ResourceCaps::builder()
            .default_cpu(*self.config.get_default_limit_cpu())
            .max_cpu(*self.config.get_default_max_cpu())
            .default_memory(*self.config.get_default_limit_memory())
            .max_memory(*self.config.get_default_max_memory())
            .pids_limit(*self.config.get_default_max_pids())
            .always_pull(*self.config.get_always_pull())
            .build()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl InstanceProvisioner for DindProvisioner {
    async fn instance_new(
        &self,
        session: &Session,
        config: InstanceConfig,
    ) -> SandparkResult<Instance> {
        let alias = utils::short_id();
        let hostname = config.hostname.clone();
        let container_name = format!("{}_{}", hostname, session.id);

        let image = if config.image_name.is_empty() {
            self.config.get_default_dind_image().clone()
        } else {
            config.image_name.clone()
        };

        let user_volume = self.ensure_user_volume(&session.id).await?;

        let mut networks = vec![session.id.clone()];
        networks.extend(config.networks.iter().cloned());

        let external_volume = if *self.config.get_external_dind_volume() {
            let size = if config.dind_volume_size.is_empty() {
                self.config.get_external_dind_volume_size().clone()
            } else {
                config.dind_volume_size.clone()
            };

            Some(
                ExternalVolumeOpts::builder()
                    .driver(self.config.get_external_dind_volume_driver().clone())
                    .size(size)
                    .build(),
            )
        } else {
            None
        };

        let client = self.factory.for_session(&session.id).await?;
        client
            .container_create(
                CreateContainerOpts::builder()
                    .image(image.clone())
                    .session_id(session.id.clone())
                    .container_name(container_name.clone())
                    .hostname(hostname.clone())
                    .server_cert(config.server_cert.clone())
                    .server_key(config.server_key.clone())
                    .ca_cert(config.ca_cert.clone())
                    .privileged(config.privileged)
                    .host_fqdn(config.playground_fqdn.clone())
                    .networks(networks)
                    .net_aliases(vec![hostname.clone(), alias])
                    .user_volume(Some(user_volume))
                    .external_volume(external_volume)
                    .limit_cpu(config.limit_cpu)
                    .limit_memory(config.limit_memory)
                    .envs(config.envs.clone())
                    .caps(self.resource_caps())
                    .build(),
            )
            .await
            .map_err(classify_capacity)?;

        let ips = client.container_ips(&container_name).await?;
        let ip = ips.get(&session.id).cloned().ok_or_else(|| {
            SandparkError::Backend(format!(
                "container {} has no address on the session network",
                container_name
            ))
        })?;

        let mut instance = Instance {
            name: container_name,
            image,
            hostname,
            proxy_host: Instance::proxy_host_for(&ip),
            routable_ip: ip.clone(),
            ip,
            limit_cpu: config.limit_cpu,
            limit_memory: config.limit_memory,
            server_cert: config.server_cert,
            server_key: config.server_key,
            ca_cert: config.ca_cert,
            cert: config.cert,
            key: config.key,
            tls: false,
            session_id: session.id.clone(),
            session_host: config.playground_fqdn,
            kind: if config.kind.is_empty() {
                INSTANCE_KIND_LINUX.to_string()
            } else {
                config.kind
            },
        };

        // The nested daemon enables TLS exactly when server-side material
        // was handed to it; dialing must agree with what the container got.
        instance.tls = instance.has_tls_material();

        Ok(instance)
    }

    async fn instance_delete(&self, session: &Session, instance: &Instance) -> SandparkResult<()> {
        let client = self.factory.for_session(&session.id).await?;

        if let Err(e) = client.container_delete(&instance.name).await {
            tracing::warn!(instance = %instance.name, error = %e, "container removal failed");
        }

        if *self.config.get_external_dind_volume() {
            if let Err(e) = client.volume_delete(&instance.name).await {
                if !e.is_not_found() {
                    tracing::warn!(
                        instance = %instance.name,
                        error = %e,
                        "external volume removal failed"
                    );
                }
            }
        }

        self.factory.evict_instance(&instance.name);

        Ok(())
    }
}
