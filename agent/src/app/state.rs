//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::deploy::git::GitSync;
use crate::deploy::locks::SiteLocks;
use crate::deploy::pipeline::DeployPipeline;
use crate::deploy::service::DeployService;
use crate::deploy::strategy::StrategyRegistry;
use crate::errors::AgentError;
use crate::exec::{CommandRunner, SystemRunner};
use crate::sites::php_fpm::PoolManager;
use crate::sites::provisioner::SiteProvisioner;
use crate::sites::vhost::VhostGenerator;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::storage::store::{Repository, Store};
use crate::workers::deployer::{DeployQueue, DeployTask};

/// Main application state
pub struct AppState {
    pub settings: Arc<Settings>,

    /// Site and deploy records
    pub store: Arc<dyn Repository>,

    /// Runs every external tool
    pub runner: Arc<dyn CommandRunner>,

    /// Per-site deploy locks
    pub locks: Arc<SiteLocks>,

    pub pipeline: Arc<DeployPipeline>,
    pub provisioner: Arc<SiteProvisioner>,
    pub deploys: Arc<DeployService>,
}

impl AppState {
    /// Wire every component. Returns the receiving end of the deploy queue,
    /// to be handed to the deployer worker.
    pub fn build(
        settings: Arc<Settings>,
        store: Arc<dyn Repository>,
        runner: Arc<dyn CommandRunner>,
    ) -> (Self, mpsc::Receiver<DeployTask>) {
        let locks = Arc::new(SiteLocks::new());
        let (queue, tasks) = DeployQueue::channel(settings.deploy.queue_capacity);

        let vhosts = Arc::new(VhostGenerator::new(
            settings.nginx.clone(),
            settings.php.socket_dir.clone(),
            settings.tools.systemctl.clone(),
            runner.clone(),
        ));
        let pools = Arc::new(PoolManager::new(
            settings.php.clone(),
            settings.tools.php.clone(),
            settings.tools.systemctl.clone(),
            runner.clone(),
        ));
        let provisioner = Arc::new(SiteProvisioner::new(
            store.clone(),
            GitSync::new(runner.clone(), settings.tools.git.clone()),
            vhosts,
            pools,
            locks.clone(),
            settings.paths.sites_dir.clone(),
        ));

        let pipeline = Arc::new(DeployPipeline::new(
            store.clone(),
            runner.clone(),
            StrategyRegistry::default(),
            settings.tools.clone(),
        ));
        let deploys = Arc::new(DeployService::new(
            store.clone(),
            pipeline.clone(),
            locks.clone(),
            queue,
        ));

        let state = Self {
            settings,
            store,
            runner,
            locks,
            pipeline,
            provisioner,
            deploys,
        };
        (state, tasks)
    }

    /// Open the persisted store and wire the components against the host
    pub async fn init(settings: Arc<Settings>) -> Result<(Self, mpsc::Receiver<DeployTask>), AgentError> {
        info!("Initializing application state...");

        let layout = StorageLayout::new(&settings.paths.data_dir);
        let store: Arc<dyn Repository> = Arc::new(Store::open(layout).await?);
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());

        Ok(Self::build(settings, store, runner))
    }

    /// Fail deploys a previous process left unfinished
    pub async fn recover(&self) -> Result<(), AgentError> {
        let recovered = self.pipeline.recover_interrupted().await?;
        if recovered > 0 {
            info!("Marked {} interrupted deploy(s) as failed", recovered);
        }
        Ok(())
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!("Shutting down application state...");
        Ok(())
    }
}
