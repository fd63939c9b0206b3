//! Build strategies, one per site type
//!
//! The pipeline owns the state machine and the log stream. A strategy only
//! decides which build steps run for its technology.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::filesys::file::File;
use crate::models::deploy::DeployOptions;
use crate::models::site::{Site, SiteType};
use crate::storage::settings::ToolSettings;
use crate::storage::store::Repository;

/// Everything a build step needs, plus the deploy's log stream
pub struct BuildContext<'a> {
    pub deploy_id: &'a str,
    pub site: &'a Site,
    pub options: &'a DeployOptions,
    pub tools: &'a ToolSettings,
    store: &'a dyn Repository,
    runner: &'a dyn CommandRunner,
    failure_logged: bool,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        deploy_id: &'a str,
        site: &'a Site,
        options: &'a DeployOptions,
        tools: &'a ToolSettings,
        store: &'a dyn Repository,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            deploy_id,
            site,
            options,
            tools,
            store,
            runner,
            failure_logged: false,
        }
    }

    /// Append a line to the deploy log
    pub async fn log(&self, message: impl AsRef<str>) -> Result<(), AgentError> {
        let message = message.as_ref();
        debug!(deploy_id = %self.deploy_id, "{}", message);
        self.store.append_log(self.deploy_id, message).await?;
        Ok(())
    }

    /// Whether the failing step already wrote its own log line
    pub fn failure_logged(&self) -> bool {
        self.failure_logged
    }

    /// Log a failure and turn it into the error that aborts the deploy
    pub async fn fail(&mut self, message: String) -> AgentError {
        match self.log(&message).await {
            Ok(()) => self.failure_logged = true,
            Err(e) => warn!(deploy_id = %self.deploy_id, "Failed to log step failure: {}", e),
        }
        AgentError::ExternalTool(message)
    }

    /// A command running in the site's checkout
    pub fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program).current_dir(&self.site.root_path)
    }

    /// Run a command. A spawn failure reads like a failed run.
    pub async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        match self.runner.run(spec).await {
            Ok(output) => output,
            Err(e) => CommandOutput {
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        }
    }

    /// Run a step that aborts the deploy when it fails.
    /// Logs `done` on success, `"<failed>: <diagnostic>"` on failure.
    pub async fn step(&mut self, spec: CommandSpec, done: &str, failed: &str) -> Result<(), AgentError> {
        let output = self.run(&spec).await;
        if !output.success() {
            let message = format!("{}: {}", failed, output.diagnostic());
            return Err(self.fail(message).await);
        }
        self.log(done).await
    }

    pub async fn site_file_exists(&self, relative: &str) -> bool {
        File::new(self.site.path(relative)).exists().await
    }
}

/// Technology-specific build steps
#[async_trait]
pub trait BuildStrategy: Send + Sync {
    fn site_type(&self) -> SiteType;

    /// Run the build steps in order, stopping at the first failing step
    async fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError>;
}

fn composer_install(ctx: &BuildContext<'_>) -> CommandSpec {
    ctx.command(&ctx.tools.composer)
        .args(["install", "--no-dev", "--optimize-autoloader", "--no-interaction"])
}

/// Plain files, nothing to build
pub struct StaticBuild;

#[async_trait]
impl BuildStrategy for StaticBuild {
    fn site_type(&self) -> SiteType {
        SiteType::Static
    }

    async fn build(&self, _ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        Ok(())
    }
}

pub struct PhpBuild;

#[async_trait]
impl BuildStrategy for PhpBuild {
    fn site_type(&self) -> SiteType {
        SiteType::Php
    }

    async fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        if ctx.options.install_dependencies && ctx.site_file_exists("composer.json").await {
            let spec = composer_install(ctx);
            ctx.step(spec, "Composer dependencies installed", "Composer install failed")
                .await?;
        }
        Ok(())
    }
}

pub struct LaravelBuild;

impl LaravelBuild {
    const CACHE_COMMANDS: [&'static str; 3] = ["config:cache", "route:cache", "view:cache"];
    const WRITABLE_DIRS: [&'static str; 2] = ["storage", "bootstrap/cache"];

    /// Best-effort: a failed cache command is logged and the deploy goes on
    async fn rebuild_caches(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        let mut failures = Vec::new();
        for command in Self::CACHE_COMMANDS {
            let spec = ctx.command(&ctx.tools.php).args(["artisan", command]);
            let output = ctx.run(&spec).await;
            if !output.success() {
                failures.push(format!("{}: {}", command, output.diagnostic()));
            }
        }

        if failures.is_empty() {
            ctx.log("Caches rebuilt").await
        } else {
            warn!(deploy_id = %ctx.deploy_id, "Cache rebuild incomplete: {}", failures.join("; "));
            ctx.log(format!("Cache rebuild incomplete (continuing): {}", failures.join("; ")))
                .await
        }
    }

    async fn fix_permissions(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        for dir in Self::WRITABLE_DIRS {
            let path = ctx.site.path(dir);
            if !File::new(&path).exists().await {
                continue;
            }
            let spec = CommandSpec::new("chmod").args(["-R", "775"]).path_arg(&path);
            let output = ctx.run(&spec).await;
            if !output.success() {
                let message = format!("Setting permissions on {} failed: {}", dir, output.diagnostic());
                return Err(ctx.fail(message).await);
            }
        }
        ctx.log("Permissions set on storage and bootstrap/cache").await
    }
}

#[async_trait]
impl BuildStrategy for LaravelBuild {
    fn site_type(&self) -> SiteType {
        SiteType::Laravel
    }

    async fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        if ctx.options.install_dependencies {
            let spec = composer_install(ctx);
            ctx.step(spec, "Composer dependencies installed", "Composer install failed")
                .await?;
        }

        if ctx.options.run_migrations {
            let spec = ctx.command(&ctx.tools.php).args(["artisan", "migrate", "--force"]);
            ctx.step(spec, "Migrations completed", "Migration failed").await?;
        }

        if ctx.options.clear_cache {
            self.rebuild_caches(ctx).await?;
        }

        self.fix_permissions(ctx).await
    }
}

pub struct PythonBuild;

#[async_trait]
impl BuildStrategy for PythonBuild {
    fn site_type(&self) -> SiteType {
        SiteType::Python
    }

    async fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        if !ctx.options.install_dependencies {
            return Ok(());
        }
        // Only an existing virtualenv is used; none is created here
        if !ctx.site_file_exists("requirements.txt").await || !ctx.site_file_exists("venv/bin/pip").await {
            return Ok(());
        }

        let pip = ctx.site.path("venv/bin/pip");
        let spec = CommandSpec::new(pip.to_string_lossy())
            .current_dir(&ctx.site.root_path)
            .args(["install", "-r", "requirements.txt"]);
        ctx.step(spec, "Python dependencies installed", "pip install failed")
            .await
    }
}

#[derive(Deserialize)]
struct PackageManifest {
    #[serde(default)]
    scripts: HashMap<String, String>,
}

pub struct NodejsBuild;

impl NodejsBuild {
    async fn has_build_script(&self, ctx: &BuildContext<'_>) -> bool {
        match File::new(ctx.site.path("package.json")).read_json::<PackageManifest>().await {
            Ok(manifest) => manifest.scripts.contains_key("build"),
            Err(e) => {
                warn!(deploy_id = %ctx.deploy_id, "Unreadable package.json: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl BuildStrategy for NodejsBuild {
    fn site_type(&self) -> SiteType {
        SiteType::Nodejs
    }

    async fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), AgentError> {
        if !ctx.site_file_exists("package.json").await {
            return Ok(());
        }

        if ctx.options.install_dependencies {
            let spec = ctx.command(&ctx.tools.npm).args(["ci", "--omit=dev"]);
            ctx.step(spec, "npm dependencies installed", "npm ci failed").await?;
        }

        if self.has_build_script(ctx).await {
            let spec = ctx.command(&ctx.tools.npm).args(["run", "build"]);
            ctx.step(spec, "npm build completed", "npm build failed").await?;
        }
        Ok(())
    }
}

/// Build strategies keyed by site type
pub struct StrategyRegistry {
    strategies: HashMap<SiteType, Arc<dyn BuildStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn register(&mut self, strategy: Arc<dyn BuildStrategy>) {
        self.strategies.insert(strategy.site_type(), strategy);
    }

    pub fn get(&self, site_type: SiteType) -> Result<Arc<dyn BuildStrategy>, AgentError> {
        self.strategies.get(&site_type).cloned().ok_or_else(|| {
            AgentError::DeployError(format!("No build strategy for site type {}", site_type))
        })
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StaticBuild));
        registry.register(Arc::new(PhpBuild));
        registry.register(Arc::new(LaravelBuild));
        registry.register(Arc::new(PythonBuild));
        registry.register(Arc::new(NodejsBuild));
        registry
    }
}
