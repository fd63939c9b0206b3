//! Deploy pipeline
//!
//! Advances a deploy through `pending -> in_progress -> success | failed`,
//! appending one log line per visible step. Step failures never escape
//! [`DeployPipeline::execute`]; they end the deploy as `failed`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::deploy::fsm::{self, DeployEvent};
use crate::deploy::git::GitSync;
use crate::deploy::strategy::{BuildContext, StrategyRegistry};
use crate::errors::AgentError;
use crate::exec::CommandRunner;
use crate::models::deploy::{Deploy, DeployStatus};
use crate::models::site::Site;
use crate::storage::settings::ToolSettings;
use crate::storage::store::Repository;

/// Reason recorded on deploys found unfinished at startup
pub const INTERRUPTED_ERROR: &str = "deploy interrupted by agent restart";

fn short_hash(commit: &str) -> &str {
    &commit[..commit.len().min(7)]
}

pub struct DeployPipeline {
    store: Arc<dyn Repository>,
    runner: Arc<dyn CommandRunner>,
    git: GitSync,
    strategies: StrategyRegistry,
    tools: ToolSettings,
}

impl DeployPipeline {
    pub fn new(
        store: Arc<dyn Repository>,
        runner: Arc<dyn CommandRunner>,
        strategies: StrategyRegistry,
        tools: ToolSettings,
    ) -> Self {
        let git = GitSync::new(runner.clone(), tools.git.clone());
        Self {
            store,
            runner,
            git,
            strategies,
            tools,
        }
    }

    async fn load(&self, deploy_id: &str) -> Result<Deploy, AgentError> {
        self.store
            .get_deploy(deploy_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("deploy {}", deploy_id)))
    }

    async fn load_site(&self, site_id: &str) -> Result<Site, AgentError> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("site {}", site_id)))
    }

    /// Apply `event` to the stored deploy and persist it
    async fn transition(&self, deploy_id: &str, event: DeployEvent) -> Result<Deploy, AgentError> {
        let mut deploy = self.load(deploy_id).await?;
        fsm::apply(&mut deploy, event)?;
        self.store.update_deploy(&deploy).await?;
        self.load(deploy_id).await
    }

    /// Run a pending deploy to completion.
    ///
    /// Returns the final record. `Err` only for bookkeeping failures (unknown
    /// deploy, storage errors); a failing step yields `Ok` with status `failed`.
    /// Deploys that are no longer pending are returned untouched.
    pub async fn execute(&self, deploy_id: &str) -> Result<Deploy, AgentError> {
        let deploy = self.load(deploy_id).await?;
        if deploy.status != DeployStatus::Pending {
            info!(deploy_id = %deploy_id, status = %deploy.status, "Skipping deploy that is no longer pending");
            return Ok(deploy);
        }
        let site = self.load_site(&deploy.site_id).await?;

        self.transition(deploy_id, DeployEvent::Start).await?;
        info!(deploy_id = %deploy_id, site = %site.domain, "Deploy #{} started", deploy.number);

        let mut ctx = BuildContext::new(
            &deploy.id,
            &site,
            &deploy.metadata,
            &self.tools,
            self.store.as_ref(),
            self.runner.as_ref(),
        );

        match self.run_steps(&mut ctx, &deploy).await {
            Ok(()) => {
                info!(deploy_id = %deploy_id, site = %site.domain, "Deploy succeeded");
                self.transition(deploy_id, DeployEvent::Succeed).await
            }
            Err(e) => {
                error!(deploy_id = %deploy_id, site = %site.domain, "Deploy failed: {}", e);
                if !ctx.failure_logged() {
                    if let Err(log_err) = ctx.log(format!("Deploy failed: {}", e)).await {
                        warn!(deploy_id = %deploy_id, "Failed to log deploy failure: {}", log_err);
                    }
                }
                self.transition(deploy_id, DeployEvent::Fail(e.to_string())).await
            }
        }
    }

    async fn run_steps(&self, ctx: &mut BuildContext<'_>, deploy: &Deploy) -> Result<(), AgentError> {
        let site = ctx.site;
        ctx.log(format!(
            "Deploy #{} started for {} (branch {})",
            deploy.number, site.domain, deploy.git_branch
        ))
        .await?;

        if deploy.metadata.force {
            let outcome = self.git.discard_local_changes(&site.root_path).await;
            if !outcome.success {
                return Err(ctx.fail(format!("Discarding local changes failed: {}", outcome.output)).await);
            }
            ctx.log("Discarded local changes (git reset --hard HEAD)").await?;
        }

        let outcome = self
            .git
            .pull_latest(&site.root_path, Some(&deploy.git_branch))
            .await;
        if !outcome.success {
            return Err(ctx.fail(format!("Git pull failed: {}", outcome.output)).await);
        }
        ctx.log(format!("Git pull succeeded at {}", outcome.output)).await?;

        if let Some(commit) = self.git.current_commit(&site.root_path).await {
            let mut current = self.load(&deploy.id).await?;
            current.commit_hash = Some(commit);
            self.store.update_deploy(&current).await?;
        }

        let strategy = self.strategies.get(site.site_type)?;
        strategy.build(ctx).await?;

        ctx.log("Deploy completed successfully").await
    }

    /// Fail a deploy that ran past its wall-clock limit
    pub async fn mark_timed_out(&self, deploy_id: &str, limit: Duration) -> Result<Deploy, AgentError> {
        let deploy = self.load(deploy_id).await?;
        if deploy.status.is_terminal() {
            return Ok(deploy);
        }

        let message = format!("deploy timed out after {}s", limit.as_secs());
        self.store
            .append_log(deploy_id, &format!("Deploy failed: {}", message))
            .await?;
        self.transition(deploy_id, DeployEvent::Fail(message)).await
    }

    /// Reset the site's working tree and mark the deploy `rolled_back`.
    ///
    /// The tree goes back to the commit of the latest earlier successful deploy
    /// of the site, or one commit behind HEAD when there is none. Build steps,
    /// vhost and pool configuration are left alone. When git fails the deploy
    /// is not modified.
    pub async fn rollback(&self, deploy_id: &str) -> Result<Deploy, AgentError> {
        let deploy = self.load(deploy_id).await?;
        fsm::next_status(deploy.status, &DeployEvent::RollBack)?;
        let site = self.load_site(&deploy.site_id).await?;

        let message = match self.previous_success_commit(&deploy).await? {
            Some((number, commit)) => {
                if !self.git.reset_to_commit(&site.root_path, &commit).await {
                    return Err(AgentError::ExternalTool(format!(
                        "Rollback failed: git reset to {} did not succeed",
                        short_hash(&commit)
                    )));
                }
                format!(
                    "Rolled back working tree to {} (deploy #{})",
                    short_hash(&commit),
                    number
                )
            }
            None => {
                if !self.git.reset_to_previous(&site.root_path).await {
                    return Err(AgentError::ExternalTool(
                        "Rollback failed: git reset to HEAD~1 did not succeed".to_string(),
                    ));
                }
                "Rolled back working tree one commit (HEAD~1); no earlier successful deploy recorded"
                    .to_string()
            }
        };

        self.store.append_log(deploy_id, &message).await?;
        let deploy = self.transition(deploy_id, DeployEvent::RollBack).await?;
        info!(deploy_id = %deploy_id, site = %site.domain, "{}", message);
        Ok(deploy)
    }

    async fn previous_success_commit(&self, deploy: &Deploy) -> Result<Option<(u64, String)>, AgentError> {
        let history = self.store.list_deploys(&deploy.site_id, usize::MAX).await?;
        Ok(history
            .into_iter()
            .filter(|d| d.number < deploy.number && d.status == DeployStatus::Success)
            .find_map(|d| d.commit_hash.map(|commit| (d.number, commit))))
    }

    /// Fail every deploy a previous process left `pending` or `in_progress`
    pub async fn recover_interrupted(&self) -> Result<usize, AgentError> {
        let mut recovered = 0;
        for site in self.store.list_sites().await? {
            for deploy in self.store.list_deploys(&site.id, usize::MAX).await? {
                if deploy.status.is_terminal() {
                    continue;
                }
                self.store
                    .append_log(&deploy.id, &format!("Deploy failed: {}", INTERRUPTED_ERROR))
                    .await?;
                self.transition(&deploy.id, DeployEvent::Fail(INTERRUPTED_ERROR.to_string()))
                    .await?;
                warn!(deploy_id = %deploy.id, site = %site.domain, "Marked interrupted deploy as failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
