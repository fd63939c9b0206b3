//! Shared fixtures: a scripted command runner and an agent wired in a tempdir
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use siteagent::app::state::AppState;
use siteagent::errors::AgentError;
use siteagent::exec::{CommandOutput, CommandRunner, CommandSpec};
use siteagent::models::deploy::{Deploy, DeployStatus};
use siteagent::models::site::{Site, SiteSpec, SiteType};
use siteagent::storage::settings::Settings;
use siteagent::storage::store::{Repository, Store};
use siteagent::workers::deployer::DeployTask;

pub const FULL_COMMIT: &str = "3f2a9c1d8e7b6a5f4e3d2c1b0a9f8e7d6c5b4a39";
pub const SHORT_COMMIT: &str = "3f2a9c1";

struct Rule {
    program: String,
    args: Vec<String>,
    output: CommandOutput,
    delay: Option<Duration>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let program = Path::new(&spec.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (spec.program == self.program || program == self.program)
            && spec.args.len() >= self.args.len()
            && spec.args.iter().zip(&self.args).all(|(a, b)| a == b)
    }
}

/// Records every command and answers from scripted rules.
///
/// Rules match on program and an argument prefix; the most recently added
/// matching rule wins. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<Rule>>,
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

impl FakeRunner {
    /// Git answers with a fixed commit; everything else succeeds
    pub fn new() -> Self {
        let runner = Self::default();
        runner.respond("git", &["rev-parse", "HEAD"], ok(&format!("{}\n", FULL_COMMIT)));
        runner.respond("git", &["rev-parse", "--short", "HEAD"], ok(&format!("{}\n", SHORT_COMMIT)));
        runner.respond("git", &["rev-parse", "--abbrev-ref", "HEAD"], ok("main\n"));
        runner
    }

    pub fn respond(&self, program: &str, args: &[&str], output: CommandOutput) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output,
            delay: None,
        });
    }

    pub fn succeed(&self, program: &str, args: &[&str], stdout: &str) {
        self.respond(program, args, ok(stdout));
    }

    pub fn fail(&self, program: &str, args: &[&str], stderr: &str) {
        self.respond(
            program,
            args,
            CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Succeed, but only after `delay`
    pub fn hang(&self, program: &str, args: &[&str], delay: Duration) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output: ok(""),
            delay: Some(delay),
        });
    }

    /// Every command run so far, rendered as `program arg...`
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.to_string())
            .collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(command))
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(command)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, AgentError> {
        self.calls.lock().unwrap().push(spec.clone());
        let (output, delay) = {
            let rules = self.rules.lock().unwrap();
            match rules.iter().rev().find(|rule| rule.matches(spec)) {
                Some(rule) => (rule.output.clone(), rule.delay),
                None => (ok(""), None),
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }
}

/// Settings with every host path inside `root`
pub fn settings_in(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths.data_dir = root.join("data");
    settings.paths.sites_dir = root.join("sites");
    settings.nginx.sites_available = root.join("nginx/sites-available");
    settings.nginx.sites_enabled = root.join("nginx/sites-enabled");
    settings.nginx.log_dir = root.join("log/nginx");
    settings.php.pool_dir_template = root
        .join("php/{version}/fpm/pool.d")
        .to_string_lossy()
        .into_owned();
    settings.php.socket_dir = root.join("run/php");
    settings.php.log_dir = root.join("log");
    settings
}

/// An agent wired against an in-memory store and a [`FakeRunner`]
pub struct Fixture {
    pub dir: TempDir,
    pub settings: Arc<Settings>,
    pub runner: Arc<FakeRunner>,
    pub store: Arc<dyn Repository>,
    pub state: AppState,
    pub tasks: mpsc::Receiver<DeployTask>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(customize: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        customize(&mut settings);
        let settings = Arc::new(settings);

        let runner = Arc::new(FakeRunner::new());
        let store: Arc<dyn Repository> = Arc::new(Store::in_memory());
        let (state, tasks) = AppState::build(settings.clone(), store.clone(), runner.clone());

        Self {
            dir,
            settings,
            runner,
            store,
            state,
            tasks,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a site with a git remote through the provisioner
    pub async fn site(&self, domain: &str, site_type: SiteType) -> Site {
        let mut spec = SiteSpec::new(domain, site_type);
        spec.git_repo = Some("https://git.example.com/acme/app.git".to_string());
        let created = self.state.provisioner.create_site(spec).await.unwrap();
        assert!(created.clone_error.is_none());
        // the fake clone leaves nothing behind
        std::fs::create_dir_all(&created.site.root_path).unwrap();
        self.runner.clear();
        created.site
    }

    /// Create a file inside the site's checkout
    pub fn touch(&self, site: &Site, relative: &str, contents: &str) {
        let path = site.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Take the next queued task and run it the way the worker does
    pub async fn run_next(&mut self) -> Deploy {
        let task = self.tasks.try_recv().expect("a queued deploy task");
        let deploy = self.state.pipeline.execute(&task.deploy_id).await.unwrap();
        assert!(deploy.status.is_terminal());
        deploy
    }

    /// Queue a deploy with default options and run it
    pub async fn deploy(&mut self, site: &Site) -> Deploy {
        let pending = self
            .state
            .deploys
            .start_deploy(&site.id, Default::default())
            .await
            .unwrap();
        assert_eq!(pending.status, DeployStatus::Pending);
        self.run_next().await
    }
}
