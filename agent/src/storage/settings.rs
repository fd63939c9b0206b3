//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/siteagent/settings.json";

/// Agent settings. Loaded once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub nginx: NginxSettings,

    #[serde(default)]
    pub php: PhpSettings,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub tools: ToolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            paths: PathSettings::default(),
            nginx: NginxSettings::default(),
            php: PhpSettings::default(),
            deploy: DeploySettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let file = File::new(path);
        if !file.exists().await {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let settings: Settings = file.read_json().await.map_err(|e| {
            AgentError::ConfigError(format!("Invalid settings file {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the agent cannot operate with
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.php.versions.is_empty() {
            return Err(AgentError::ConfigError(
                "php.versions must list at least one version".to_string(),
            ));
        }
        if !self.php.versions.contains(&self.php.default_version) {
            return Err(AgentError::ConfigError(format!(
                "php.default_version {} is not in php.versions",
                self.php.default_version
            )));
        }
        if !self.php.pool_dir_template.contains("{version}") {
            return Err(AgentError::ConfigError(
                "php.pool_dir_template must contain {version}".to_string(),
            ));
        }
        if self.deploy.workers == 0 {
            return Err(AgentError::ConfigError("deploy.workers must be > 0".to_string()));
        }
        if self.deploy.timeout_secs == 0 {
            return Err(AgentError::ConfigError(
                "deploy.timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8720
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where the agent keeps its own state and the sites it manages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Site and deploy records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Parent of every site's checkout
    #[serde(default = "default_sites_dir")]
    pub sites_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/siteagent")
}

fn default_sites_dir() -> PathBuf {
    PathBuf::from("/opt/siteagent/sites")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sites_dir: default_sites_dir(),
        }
    }
}

/// nginx settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxSettings {
    #[serde(default = "default_sites_available")]
    pub sites_available: PathBuf,

    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: PathBuf,

    /// Per-site access/error logs
    #[serde(default = "default_nginx_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_nginx_binary")]
    pub binary: String,

    /// Local port python apps listen on
    #[serde(default = "default_python_port")]
    pub python_upstream_port: u16,

    /// Local port node apps listen on
    #[serde(default = "default_nodejs_port")]
    pub nodejs_upstream_port: u16,
}

fn default_sites_available() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_sites_enabled() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_nginx_log_dir() -> PathBuf {
    PathBuf::from("/var/log/nginx")
}

fn default_nginx_binary() -> String {
    "nginx".to_string()
}

fn default_python_port() -> u16 {
    8001
}

fn default_nodejs_port() -> u16 {
    3000
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
            log_dir: default_nginx_log_dir(),
            binary: default_nginx_binary(),
            python_upstream_port: default_python_port(),
            nodejs_upstream_port: default_nodejs_port(),
        }
    }
}

/// PHP / PHP-FPM settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhpSettings {
    /// Versions sites may use
    #[serde(default = "default_php_versions")]
    pub versions: Vec<String>,

    #[serde(default = "default_php_version")]
    pub default_version: String,

    /// Pool directory, `{version}` is substituted
    #[serde(default = "default_pool_dir_template")]
    pub pool_dir_template: String,

    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Per-pool error logs
    #[serde(default = "default_php_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_web_user")]
    pub user: String,

    #[serde(default = "default_web_user")]
    pub group: String,
}

fn default_php_versions() -> Vec<String> {
    vec!["8.1".to_string(), "8.2".to_string(), "8.3".to_string()]
}

fn default_php_version() -> String {
    "8.2".to_string()
}

fn default_pool_dir_template() -> String {
    "/etc/php/{version}/fpm/pool.d".to_string()
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/run/php")
}

fn default_php_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_web_user() -> String {
    "www-data".to_string()
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            versions: default_php_versions(),
            default_version: default_php_version(),
            pool_dir_template: default_pool_dir_template(),
            socket_dir: default_socket_dir(),
            log_dir: default_php_log_dir(),
            user: default_web_user(),
            group: default_web_user(),
        }
    }
}

impl PhpSettings {
    pub fn is_supported(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    pub fn pool_dir(&self, version: &str) -> PathBuf {
        PathBuf::from(self.pool_dir_template.replace("{version}", version))
    }
}

/// Deploy dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Wall-clock limit for one deploy
    #[serde(default = "default_deploy_timeout")]
    pub timeout_secs: u64,

    /// Deploys executing concurrently (never two for the same site)
    #[serde(default = "default_deploy_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_deploy_timeout() -> u64 {
    600
}

fn default_deploy_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_deploy_timeout(),
            workers: default_deploy_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl DeploySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Binaries the agent invokes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_systemctl")]
    pub systemctl: String,

    #[serde(default = "default_composer")]
    pub composer: String,

    #[serde(default = "default_php")]
    pub php: String,

    #[serde(default = "default_npm")]
    pub npm: String,
}

fn default_git() -> String {
    "git".to_string()
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}

fn default_composer() -> String {
    "composer".to_string()
}

fn default_php() -> String {
    "php".to_string()
}

fn default_npm() -> String {
    "npm".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            git: default_git(),
            systemctl: default_systemctl(),
            composer: default_composer(),
            php: default_php(),
            npm: default_npm(),
        }
    }
}
