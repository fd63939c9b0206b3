//! Deploy operations exposed to the transport

use std::sync::Arc;

use tracing::{info, warn};

use crate::deploy::fsm::{self, DeployEvent};
use crate::deploy::locks::SiteLocks;
use crate::deploy::pipeline::DeployPipeline;
use crate::errors::AgentError;
use crate::models::deploy::{Deploy, DeployOptions};
use crate::models::site::validate_branch;
use crate::storage::store::Repository;
use crate::workers::deployer::{DeployQueue, DeployTask};

pub const DEFAULT_LIST_LIMIT: usize = 10;

pub struct DeployService {
    store: Arc<dyn Repository>,
    pipeline: Arc<DeployPipeline>,
    locks: Arc<SiteLocks>,
    queue: DeployQueue,
}

impl DeployService {
    pub fn new(
        store: Arc<dyn Repository>,
        pipeline: Arc<DeployPipeline>,
        locks: Arc<SiteLocks>,
        queue: DeployQueue,
    ) -> Self {
        Self {
            store,
            pipeline,
            locks,
            queue,
        }
    }

    /// Record a pending deploy and queue it. Returns before anything runs.
    pub async fn start_deploy(&self, site_id: &str, options: DeployOptions) -> Result<Deploy, AgentError> {
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("site {}", site_id)))?;

        if let Some(branch) = &options.git_branch {
            validate_branch(branch)?;
        }
        let branch = options
            .git_branch
            .clone()
            .unwrap_or_else(|| site.git_branch.clone());

        let deploy = self
            .store
            .insert_deploy(Deploy::pending(&site.id, &branch, options))
            .await?;

        let task = DeployTask {
            deploy_id: deploy.id.clone(),
            site_id: site.id.clone(),
        };
        if let Err(e) = self.queue.submit(task) {
            warn!(deploy_id = %deploy.id, "Could not queue deploy: {}", e);
            self.store
                .append_log(&deploy.id, &format!("Deploy failed: {}", e))
                .await?;
            let mut rejected = deploy.clone();
            fsm::apply(&mut rejected, DeployEvent::Fail(e.to_string()))?;
            self.store.update_deploy(&rejected).await?;
            return Err(e);
        }

        info!(deploy_id = %deploy.id, site = %site.domain, branch = %branch, "Deploy #{} queued", deploy.number);
        Ok(deploy)
    }

    pub async fn get_deploy(&self, deploy_id: &str) -> Result<Deploy, AgentError> {
        self.store
            .get_deploy(deploy_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("deploy {}", deploy_id)))
    }

    /// Most recent first
    pub async fn list_deploys(&self, site_id: &str, limit: usize) -> Result<Vec<Deploy>, AgentError> {
        if self.store.get_site(site_id).await?.is_none() {
            return Err(AgentError::NotFound(format!("site {}", site_id)));
        }
        self.store.list_deploys(site_id, limit).await
    }

    /// Roll back the site's working tree. Refused while a deploy of the same
    /// site is executing.
    pub async fn rollback(&self, deploy_id: &str) -> Result<Deploy, AgentError> {
        let deploy = self.get_deploy(deploy_id).await?;
        let _guard = self.locks.try_lock(&deploy.site_id).await.ok_or_else(|| {
            AgentError::Conflict(format!(
                "A deploy of site {} is executing, retry the rollback when it finishes",
                deploy.site_id
            ))
        })?;
        self.pipeline.rollback(deploy_id).await
    }
}
