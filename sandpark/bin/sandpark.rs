use std::sync::Arc;

use clap::Parser;
use sandpark::{
    cluster::{ClusterFactory, LocalCachedClusterFactory},
    config::{Args, Config},
    core::Core,
    docker::{BackendFactory, LocalCachedFactory},
    event::{EventBus, LocalBroker},
    provisioner::{
        DindProvisioner, InstanceProvisionerFactory, OverlaySessionProvisioner,
        SessionProvisioner, INSTANCE_KIND_LINUX,
    },
    scheduler::{
        task::{
            CheckK8sClusterExposedPorts, CheckK8sClusterStatus, CheckPorts, CheckSwarmPorts,
            CheckSwarmStatus, CollectStats, Task,
        },
        Scheduler,
    },
    server::{self, ServerState},
    storage::{FileStorage, Storage},
    types::Playground,
    SandparkResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> SandparkResult<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(Args::parse().into_config()?);

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(config.get_session_file())?);
    let broker: Arc<dyn EventBus> = Arc::new(LocalBroker::new());

    let factory: Arc<dyn BackendFactory> = Arc::new(LocalCachedFactory::new(config.clone()));
    let cluster: Arc<dyn ClusterFactory> = Arc::new(LocalCachedClusterFactory::new());

    let session_provisioner: Arc<dyn SessionProvisioner> =
        Arc::new(OverlaySessionProvisioner::new(factory.clone()));
    let provisioners = InstanceProvisionerFactory::new(
        INSTANCE_KIND_LINUX,
        Arc::new(DindProvisioner::new(config.clone(), factory.clone())),
    );

    let core = Arc::new(Core::new(
        config.clone(),
        storage,
        broker.clone(),
        factory.clone(),
        cluster.clone(),
        session_provisioner,
        provisioners,
    ));

    ensure_default_playground(&core, &config)?;

    let tasks: Vec<Arc<dyn Task>> = vec![
        Arc::new(CheckPorts::new(broker.clone(), factory.clone())),
        Arc::new(CheckSwarmPorts::new(broker.clone(), factory.clone())),
        Arc::new(CheckSwarmStatus::new(broker.clone(), factory.clone())),
        Arc::new(CollectStats::new(broker.clone(), factory.clone())),
        Arc::new(CheckK8sClusterStatus::new(broker.clone(), cluster.clone())),
        Arc::new(CheckK8sClusterExposedPorts::new(broker, cluster)),
    ];

    let scheduler = Arc::new(Scheduler::new(core.clone(), tasks));
    scheduler.clone().start();

    let result = server::serve(ServerState::new(core)).await;

    scheduler.stop().await;

    result
}

/// Creates the default playground for the configured domain on first boot.
fn ensure_default_playground(core: &Core, config: &Config) -> SandparkResult<()> {
    if core.playground_find_by_domain(config.get_domain()).is_ok() {
        return Ok(());
    }

    let playground = Playground::builder()
        .domain(config.get_domain().clone())
        .default_dind_instance_image(config.get_default_dind_image().clone())
        .available_dind_instance_images(vec![config.get_default_dind_image().clone()])
        .default_session_duration(*config.get_max_session_duration())
        .tasks(vec![".*".to_string()])
        .providers(config.get_oauth_providers().iter().cloned().collect())
        .build();

    let playground = core.playground_new(playground)?;
    tracing::info!(
        playground = %playground.id,
        domain = %playground.domain,
        "default playground created"
    );

    Ok(())
}
