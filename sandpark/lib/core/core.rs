//! Core operations over the entity graph.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cluster::ClusterFactory,
    config::{Config, INSTANCE_DELETE_TIMEOUT},
    docker::{clamp_cpu, clamp_memory, BackendFactory, ByteStream},
    event::{EventBus, EventType},
    provisioner::{InstanceProvisionerFactory, SessionProvisioner, INSTANCE_KIND_LINUX},
    storage::Storage,
    types::{Instance, InstanceConfig, LoginRequest, Playground, Session, SessionConfig, User},
    utils, SandparkError, SandparkResult,
};

use super::Cancellations;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many times a fresh session id is retried on collision before giving
/// up.
const SESSION_ID_ATTEMPTS: usize = 5;

/// Where uploads land inside an instance.
const UPLOAD_DIR: &str = "/root";

/// File name the fetched stack manifest is placed under inside the
/// deploying instance.
const STACK_MANIFEST_NAME: &str = "stack.yml";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The entity authority.
///
/// The core is the only component permitted to mutate the entity graph. It
/// validates requests against storage, delegates resource work to the
/// provisioners, records the outcome, and emits lifecycle events. Probers
/// and the HTTP adapter hold an `Arc<Core>` and nothing else.
pub struct Core {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    broker: Arc<dyn EventBus>,
    factory: Arc<dyn BackendFactory>,
    cluster: Arc<dyn ClusterFactory>,
    session_provisioner: Arc<dyn SessionProvisioner>,
    provisioners: InstanceProvisionerFactory,
    cancellations: Cancellations,

    /// Sessions with a close in flight. At most one close runs per session.
    closing: DashMap<String, ()>,

    /// Write halves of attached instance terminals, keyed by instance name.
    terminals: Arc<DashMap<String, mpsc::UnboundedSender<Bytes>>>,

    /// Client for fetching upload sources.
    http: reqwest::Client,
}

/// Profile data reported by an OAuth provider at login time.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    /// The provider name.
    pub provider: String,

    /// The subject identifier at the provider.
    pub provider_user_id: String,

    /// Display name.
    pub name: String,

    /// Avatar URL.
    pub avatar: String,

    /// Contact email.
    pub email: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Core {
    /// Wires a core over its collaborators.
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        broker: Arc<dyn EventBus>,
        factory: Arc<dyn BackendFactory>,
        cluster: Arc<dyn ClusterFactory>,
        session_provisioner: Arc<dyn SessionProvisioner>,
        provisioners: InstanceProvisionerFactory,
    ) -> Self {
        Self {
            config,
            storage,
            broker,
            factory,
            cluster,
            session_provisioner,
            provisioners,
            cancellations: Cancellations::new(),
            closing: DashMap::new(),
            terminals: Arc::new(DashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// The runtime configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The storage this core mutates.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The event broker lifecycle events go out on.
    pub fn broker(&self) -> &Arc<dyn EventBus> {
        &self.broker
    }

    /// The backend client factory.
    pub fn backend_factory(&self) -> &Arc<dyn BackendFactory> {
        &self.factory
    }

    /// The cluster probing factory.
    pub fn cluster_factory(&self) -> &Arc<dyn ClusterFactory> {
        &self.cluster
    }

    /// The per-instance cancellation token, shared with the scheduler so
    /// probes die with their instance.
    pub fn instance_context(&self, instance: &Instance) -> CancellationToken {
        self.cancellations
            .instance_token(&instance.name, &instance.session_id)
    }

    //----------------------------------------------------------------------------------------------
    // Playgrounds
    //----------------------------------------------------------------------------------------------

    /// Registers a playground, assigning an id when the caller supplied
    /// none. The domain must be unique.
    pub fn playground_new(&self, mut playground: Playground) -> SandparkResult<Playground> {
        if playground.domain.is_empty() {
            return Err(SandparkError::Validation(
                "playground domain must not be empty".to_string(),
            ));
        }

        if playground.id.is_empty() {
            playground.id = utils::short_id();
        }

        self.storage.playground_create(&playground)?;
        Ok(playground)
    }

    /// Fetches a playground by id.
    pub fn playground_get(&self, id: &str) -> SandparkResult<Playground> {
        self.storage.playground_get(id)
    }

    /// Lists all playgrounds.
    pub fn playground_list(&self) -> SandparkResult<Vec<Playground>> {
        self.storage.playground_list()
    }

    /// O(1) lookup of a playground by request host.
    pub fn playground_find_by_domain(&self, domain: &str) -> SandparkResult<Playground> {
        self.storage.playground_find_by_domain(domain)
    }

    //----------------------------------------------------------------------------------------------
    // Sessions
    //----------------------------------------------------------------------------------------------

    /// Creates a session: resolves the playground, validates the requested
    /// duration, stores the session, provisions its overlay network and
    /// emits `session new`. The expiry deadline is recorded absolutely; the
    /// scheduler reaps past-deadline sessions on its tick.
    pub async fn session_new(&self, config: SessionConfig) -> SandparkResult<Session> {
        let playground = self.storage.playground_get(&config.playground_id)?;

        let duration = config
            .duration
            .unwrap_or(playground.default_session_duration);
        if duration > playground.default_session_duration {
            return Err(SandparkError::Validation(format!(
                "requested duration exceeds the playground maximum of {}s",
                playground.default_session_duration.as_secs()
            )));
        }

        let now = Utc::now();
        let expires_at = now
            + chrono::TimeDelta::from_std(duration)
                .map_err(|e| SandparkError::Validation(format!("bad duration: {}", e)))?;

        let mut session = Session {
            id: String::new(),
            playground_id: playground.id.clone(),
            user_id: config.user_id.clone(),
            created_at: now,
            expires_at,
            ready: config.stack.is_none(),
            stack: config.stack.clone(),
        };

        let mut stored = false;
        for _ in 0..SESSION_ID_ATTEMPTS {
            session.id = utils::session_id();
            match self.storage.session_create(&session) {
                Result::Ok(()) => {
                    stored = true;
                    break;
                }
                Err(SandparkError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        if !stored {
            return Err(SandparkError::Backend(
                "could not allocate a session id".to_string(),
            ));
        }

        if let Err(e) = self.session_provisioner.session_new(&session).await {
            // Roll the record back; a session without substrate must not
            // exist.
            if let Err(cleanup) = self.storage.session_delete(&session.id) {
                tracing::warn!(session = %session.id, error = %cleanup, "session rollback failed");
            }
            return Err(e);
        }

        self.cancellations.session_token(&session.id);

        tracing::info!(session = %session.id, playground = %playground.id, "session created");
        self.broker.emit(
            EventType::SessionNew,
            &session.id,
            serde_json::to_value(&session)?,
        );

        Ok(session)
    }

    /// Fetches a session by id.
    pub fn session_get(&self, id: &str) -> SandparkResult<Session> {
        self.storage.session_get(id)
    }

    /// Closes a session: tears down its instances in parallel, releases the
    /// overlay network and user data directory, drops cached backend
    /// clients, removes the record and emits `session end` at most once.
    /// Idempotent; concurrent calls collapse onto the one in flight.
    pub async fn session_close(&self, session_id: &str) -> SandparkResult<()> {
        if self.closing.insert(session_id.to_string(), ()).is_some() {
            return Ok(());
        }

        let result = self.session_close_inner(session_id).await;
        self.closing.remove(session_id);
        result
    }

    async fn session_close_inner(&self, session_id: &str) -> SandparkResult<()> {
        let session = match self.storage.session_get(session_id) {
            Result::Ok(session) => session,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        // Cancelling the session token reaches every per-instance child:
        // stats streams and terminal pumps stop before teardown begins.
        self.cancellations.cancel_session(&session.id);

        let instances = self.storage.instance_find_by_session(&session.id)?;
        let deletions = instances.iter().map(|instance| async {
            let outcome = time::timeout(
                INSTANCE_DELETE_TIMEOUT,
                self.teardown_instance(&session, instance),
            )
            .await;

            match outcome {
                Result::Ok(Result::Ok(())) => {}
                Result::Ok(Err(e)) => {
                    tracing::warn!(instance = %instance.name, error = %e, "instance teardown failed");
                }
                Err(_) => {
                    tracing::warn!(instance = %instance.name, "instance teardown timed out");
                }
            }
        });
        futures::future::join_all(deletions).await;

        if let Err(e) = self.session_provisioner.session_close(&session).await {
            tracing::warn!(session = %session.id, error = %e, "session substrate release failed");
        }

        let data_dir = self.config.session_data_dir(&session.id);
        if let Err(e) = tokio::fs::remove_dir_all(&data_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(session = %session.id, error = %e, "user data removal failed");
            }
        }

        self.factory.evict_session(&session.id);
        self.cluster.evict_session(&session.id);

        match self.storage.session_delete(&session.id) {
            Result::Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        tracing::info!(session = %session.id, "session closed");
        self.broker
            .emit(EventType::SessionEnd, &session.id, json!({ "id": session.id }));

        Ok(())
    }

    /// Deploys the session's stack: provisions the first instance, places
    /// the fetched manifest inside it and brings it up through the
    /// instance's compose tooling, streaming build output as
    /// `session builder out` events. The session is marked ready once the
    /// deployment exits cleanly. A session without a stack, or one already
    /// ready, is a no-op.
    pub async fn session_deploy_stack(
        &self,
        session: &Session,
        config: InstanceConfig,
    ) -> SandparkResult<()> {
        let session = self.storage.session_get(&session.id)?;
        let Some(stack) = session.stack.clone() else {
            return Ok(());
        };
        if session.ready {
            return Ok(());
        }

        self.builder_out(&session.id, &format!("Fetching stack {}\r\n", stack.url));
        let resp = self.http.get(&stack.url).send().await?;
        if !resp.status().is_success() {
            return Err(SandparkError::Validation(format!(
                "stack manifest {} answered {}",
                stack.url,
                resp.status()
            )));
        }
        let manifest = resp.bytes().await?;

        let instance = self.instance_new(&session, config).await?;
        self.instance_upload_from_reader(&instance, STACK_MANIFEST_NAME, manifest)
            .await?;

        let stack_name = if stack.name.is_empty() {
            STACK_MANIFEST_NAME
        } else {
            stack.name.as_str()
        };
        self.builder_out(&session.id, &format!("Deploying {}\r\n", stack_name));

        // Compose output streams onto the builder topic as it arrives, the
        // same path browsers watch over the session WebSocket.
        let (mut writer, mut reader) = tokio::io::duplex(8192);
        let broker = self.broker.clone();
        let session_id = session.id.clone();
        let pump = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Result::Ok(0) | Err(_) => break,
                    Result::Ok(n) => broker.emit(
                        EventType::SessionBuilderOut,
                        &session_id,
                        json!(String::from_utf8_lossy(&buf[..n])),
                    ),
                }
            }
        });

        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("docker-compose -f {}/{} up -d", UPLOAD_DIR, STACK_MANIFEST_NAME),
        ];
        let client = self.factory.for_session(&session.id).await?;
        let exit_code = client
            .exec_attach(&instance.name, command, &mut writer)
            .await;
        drop(writer);
        let _ = pump.await;
        let exit_code = exit_code?;

        if exit_code != 0 {
            self.builder_out(&session.id, "Stack deployment failed\r\n");
            return Err(SandparkError::Backend(format!(
                "stack deployment exited with code {}",
                exit_code
            )));
        }

        let mut refreshed = self.storage.session_get(&session.id)?;
        refreshed.ready = true;
        self.storage.session_put(&refreshed)?;

        tracing::info!(session = %session.id, stack = stack_name, "stack deployed");
        self.builder_out(&session.id, "Stack deployed\r\n");

        Ok(())
    }

    fn builder_out(&self, session_id: &str, line: &str) {
        self.broker
            .emit(EventType::SessionBuilderOut, session_id, json!(line));
    }

    /// Releases one instance during session close. No `instance delete`
    /// event fires here; `session end` covers the whole arena.
    async fn teardown_instance(
        &self,
        session: &Session,
        instance: &Instance,
    ) -> SandparkResult<()> {
        self.terminals.remove(&instance.name);

        let provisioner = self.provisioners.get(&instance.kind)?;
        provisioner.instance_delete(session, instance).await?;

        match self.storage.instance_delete(&instance.name) {
            Result::Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Instances
    //----------------------------------------------------------------------------------------------

    /// Creates an instance in `session`: validates the request against the
    /// playground, provisions the sandbox host, stores the record, emits
    /// `instance new` and attaches the terminal stream.
    pub async fn instance_new(
        &self,
        session: &Session,
        mut config: InstanceConfig,
    ) -> SandparkResult<Instance> {
        let session = self.storage.session_get(&session.id)?;
        let playground = self.storage.playground_get(&session.playground_id)?;

        let existing = self.storage.instance_find_by_session(&session.id)?;
        let cap = *self.config.get_max_instances();
        if cap > 0 && existing.len() >= cap {
            return Err(SandparkError::OutOfCapacity(format!(
                "session {} reached its instance cap",
                session.id
            )));
        }

        if config.kind == "windows"
            && (*self.config.get_no_windows() || !playground.allow_windows_instances)
        {
            return Err(SandparkError::Validation(
                "windows instances are disabled".to_string(),
            ));
        }
        if config.kind.is_empty() {
            config.kind = INSTANCE_KIND_LINUX.to_string();
        }

        if config.image_name.is_empty() {
            config.image_name = playground.default_dind_instance_image.clone();
        } else if !playground.allows_image(&config.image_name) {
            return Err(SandparkError::Validation(format!(
                "image {} is not available on this playground",
                config.image_name
            )));
        }

        if config.hostname.is_empty() {
            config.hostname = next_hostname(&existing);
        }

        if !config.networks.is_empty() && !self.config.get_unsafe_mode() {
            tracing::warn!(
                session = %session.id,
                "extra networks requested outside unsafe mode, ignoring"
            );
            config.networks.clear();
        }

        config.privileged = playground.privileged;

        // The record must reflect what the container actually gets, so the
        // caps apply before provisioning.
        config.limit_cpu = clamp_cpu(
            config.limit_cpu,
            *self.config.get_default_limit_cpu(),
            *self.config.get_default_max_cpu(),
        );
        config.limit_memory = clamp_memory(
            config.limit_memory,
            *self.config.get_default_limit_memory(),
            *self.config.get_default_max_memory(),
        );

        let name = format!("{}_{}", config.hostname, session.id);
        if self.storage.instance_get(&name).is_ok() {
            return Err(SandparkError::Conflict(format!(
                "instance {} already exists",
                name
            )));
        }

        let provisioner = self.provisioners.get(&config.kind)?;
        let instance = provisioner.instance_new(&session, config).await?;

        if let Err(e) = self.storage.instance_create(&instance) {
            // The record lost a race; take the freshly provisioned host back
            // down rather than strand it.
            if let Err(cleanup) = provisioner.instance_delete(&session, &instance).await {
                tracing::warn!(instance = %instance.name, error = %cleanup, "instance rollback failed");
            }
            return Err(e);
        }

        let token = self
            .cancellations
            .instance_token(&instance.name, &session.id);

        tracing::info!(instance = %instance.name, session = %session.id, "instance created");
        self.broker.emit(
            EventType::InstanceNew,
            &session.id,
            serde_json::to_value(&instance)?,
        );

        self.spawn_terminal(&session.id, &instance, token);

        Ok(instance)
    }

    /// Fetches an instance, scoped to its session.
    pub fn instance_get(&self, session: &Session, name: &str) -> SandparkResult<Instance> {
        let instance = self.storage.instance_get(name)?;
        if instance.session_id != session.id {
            return Err(SandparkError::NotFound(format!("instance {}", name)));
        }

        Ok(instance)
    }

    /// Lists the instances of a session.
    pub fn instance_find_by_session(&self, session: &Session) -> SandparkResult<Vec<Instance>> {
        self.storage.instance_find_by_session(&session.id)
    }

    /// Deletes an instance and emits `instance delete`. A missing instance
    /// surfaces as `NotFound`, so a repeated delete answers 404 and emits
    /// nothing.
    pub async fn instance_delete(&self, session: &Session, name: &str) -> SandparkResult<()> {
        let instance = self.instance_get(session, name)?;

        self.cancellations.cancel_instance(&instance.name);
        self.terminals.remove(&instance.name);

        let provisioner = self.provisioners.get(&instance.kind)?;
        provisioner.instance_delete(session, &instance).await?;

        self.storage.instance_delete(&instance.name)?;

        tracing::info!(instance = %instance.name, session = %session.id, "instance deleted");
        self.broker.emit(
            EventType::InstanceDelete,
            &session.id,
            json!({ "name": instance.name }),
        );

        Ok(())
    }

    /// Resizes the instance's terminal.
    pub async fn instance_resize(
        &self,
        instance: &Instance,
        rows: u32,
        cols: u32,
    ) -> SandparkResult<()> {
        let client = self.factory.for_session(&instance.session_id).await?;
        client.container_resize(&instance.name, rows, cols).await
    }

    /// Runs a command inside the instance, returning its exit code.
    pub async fn instance_exec(
        &self,
        instance: &Instance,
        command: Vec<String>,
    ) -> SandparkResult<i64> {
        let client = self.factory.for_session(&instance.session_id).await?;
        client.exec(&instance.name, command).await
    }

    /// Streams a file out of the instance.
    pub async fn instance_file(&self, instance: &Instance, path: &str) -> SandparkResult<ByteStream> {
        let client = self.factory.for_session(&instance.session_id).await?;
        client.copy_from_container(&instance.name, path).await
    }

    /// Uploads raw bytes into the instance as `file_name`.
    pub async fn instance_upload_from_reader(
        &self,
        instance: &Instance,
        file_name: &str,
        content: Bytes,
    ) -> SandparkResult<()> {
        let client = self.factory.for_session(&instance.session_id).await?;
        client
            .copy_to_container(&instance.name, UPLOAD_DIR, file_name, content)
            .await
    }

    /// Fetches `url` and uploads the body into the instance, named after the
    /// last path segment.
    pub async fn instance_upload_from_url(
        &self,
        instance: &Instance,
        url: &str,
    ) -> SandparkResult<()> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(SandparkError::Validation(format!(
                "upload source {} answered {}",
                url,
                resp.status()
            )));
        }

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("upload")
            .to_string();
        let content = resp.bytes().await?;

        self.instance_upload_from_reader(instance, &file_name, content)
            .await
    }

    /// Feeds terminal input to an attached instance. Input for instances
    /// without an attached terminal is dropped.
    pub fn instance_terminal_write(&self, instance_name: &str, data: Bytes) {
        if let Some(writer) = self.terminals.get(instance_name) {
            let _ = writer.send(data);
        }
    }

    /// Attaches the instance's TTY and pumps output onto the event broker
    /// until the instance context cancels.
    fn spawn_terminal(&self, session_id: &str, instance: &Instance, token: CancellationToken) {
        let factory = self.factory.clone();
        let broker = self.broker.clone();
        let terminals = self.terminals.clone();
        let name = instance.name.clone();
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let client = match factory.for_session(&session_id).await {
                Result::Ok(client) => client,
                Err(e) => {
                    tracing::warn!(instance = %name, error = %e, "terminal attach failed");
                    return;
                }
            };

            let io = match client.container_attach(&name).await {
                Result::Ok(io) => io,
                Err(e) => {
                    tracing::debug!(instance = %name, error = %e, "terminal attach unsupported");
                    return;
                }
            };

            let (mut reader, mut writer) = tokio::io::split(io);

            let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
            terminals.insert(name.clone(), tx);

            let input_pump = tokio::spawn(async move {
                while let Some(data) = rx.recv().await {
                    if writer.write_all(&data).await.is_err() {
                        break;
                    }
                }
            });

            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    read = reader.read(&mut buf) => match read {
                        Result::Ok(0) | Err(_) => break,
                        Result::Ok(n) => {
                            broker.emit(
                                EventType::InstanceTerminalOut,
                                &session_id,
                                json!([name, String::from_utf8_lossy(&buf[..n])]),
                            );
                        }
                    },
                }
            }

            terminals.remove(&name);
            input_pump.abort();
        });
    }

    //----------------------------------------------------------------------------------------------
    // Users
    //----------------------------------------------------------------------------------------------

    /// Fetches a user by id.
    pub fn user_get(&self, id: &str) -> SandparkResult<User> {
        self.storage.user_get(id)
    }

    /// Opens a login request for the OAuth adapter; the id doubles as the
    /// state parameter.
    pub fn user_new_login_request(&self, redirect: &str) -> SandparkResult<LoginRequest> {
        let request = LoginRequest {
            id: utils::short_id(),
            redirect: redirect.to_string(),
        };

        self.storage.login_request_create(&request)?;
        Ok(request)
    }

    /// Records a completed login: finds or creates the user for the
    /// `(provider, subject)` pair within the playground and refreshes the
    /// profile.
    pub fn user_login(
        &self,
        playground: &Playground,
        profile: UserProfile,
    ) -> SandparkResult<User> {
        match self.storage.user_find_by_provider(
            &playground.id,
            &profile.provider,
            &profile.provider_user_id,
        ) {
            Result::Ok(mut user) => {
                user.name = profile.name;
                user.avatar = profile.avatar;
                user.email = profile.email;
                self.storage.user_put(&user)?;
                Ok(user)
            }
            Err(e) if e.is_not_found() => {
                let user = User {
                    id: utils::short_id(),
                    name: profile.name,
                    avatar: profile.avatar,
                    provider: profile.provider,
                    provider_user_id: profile.provider_user_id,
                    playground_id: playground.id.clone(),
                    email: profile.email,
                };

                self.storage.user_create(&user)?;
                Ok(user)
            }
            Err(e) => Err(e),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks the first free `nodeN` hostname within a session.
fn next_hostname(existing: &[Instance]) -> String {
    for n in 1.. {
        let candidate = format!("node{}", n);
        if !existing.iter().any(|i| i.hostname == candidate) {
            return candidate;
        }
    }

    unreachable!()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_hostname_skips_taken_slots() {
        let taken = |hostname: &str| Instance {
            hostname: hostname.to_string(),
            ..Default::default()
        };

        assert_eq!(next_hostname(&[]), "node1");
        assert_eq!(next_hostname(&[taken("node1")]), "node2");
        assert_eq!(next_hostname(&[taken("node1"), taken("node3")]), "node2");
    }
}
