//! PHP-FPM pool manager
//!
//! Each PHP-backed site gets its own pool, listening on a socket unique to
//! the (site, version) pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::filesys::file::File;
use crate::storage::settings::PhpSettings;

/// `<socket_dir>/php<version>-fpm-<site_id>.sock`
pub fn socket_path(socket_dir: &Path, site_id: &str, version: &str) -> PathBuf {
    socket_dir.join(format!("php{}-fpm-{}.sock", version, site_id))
}

/// What an installed PHP runtime reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhpInfo {
    pub version: String,

    /// First line of `php -v`
    pub full_version: String,

    /// `systemctl is-active` of the version's FPM service
    pub status: String,
}

pub struct PoolManager {
    php: PhpSettings,
    php_binary: String,
    systemctl: String,
    runner: Arc<dyn CommandRunner>,
}

impl PoolManager {
    pub fn new(
        php: PhpSettings,
        php_binary: impl Into<String>,
        systemctl: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            php,
            php_binary: php_binary.into(),
            systemctl: systemctl.into(),
            runner,
        }
    }

    pub fn settings(&self) -> &PhpSettings {
        &self.php
    }

    pub fn socket_path(&self, site_id: &str, version: &str) -> PathBuf {
        socket_path(&self.php.socket_dir, site_id, version)
    }

    pub fn pool_file(&self, site_id: &str, version: &str) -> File {
        File::new(self.php.pool_dir(version).join(format!("{}.conf", site_id)))
    }

    fn fpm_service(version: &str) -> String {
        format!("php{}-fpm", version)
    }

    fn versioned_binary(&self, version: &str) -> String {
        format!("{}{}", self.php_binary, version)
    }

    pub fn render_pool(&self, site_id: &str, version: &str) -> String {
        let socket = self.socket_path(site_id, version);
        let error_log = self
            .php
            .log_dir
            .join(format!("php{}-fpm-{}.log", version, site_id));
        format!(
            "[{site_id}]\n\
             user = {user}\n\
             group = {group}\n\
             \n\
             listen = {socket}\n\
             listen.owner = {user}\n\
             listen.group = {group}\n\
             listen.mode = 0660\n\
             \n\
             pm = dynamic\n\
             pm.max_children = 50\n\
             pm.start_servers = 5\n\
             pm.min_spare_servers = 5\n\
             pm.max_spare_servers = 35\n\
             pm.max_requests = 500\n\
             \n\
             php_admin_value[error_log] = {error_log}\n\
             php_admin_flag[log_errors] = on\n\
             \n\
             chdir = /\n",
            site_id = site_id,
            user = self.php.user,
            group = self.php.group,
            socket = socket.display(),
            error_log = error_log.display(),
        )
    }

    fn ensure_supported(&self, version: &str) -> Result<(), AgentError> {
        if !self.php.is_supported(version) {
            return Err(AgentError::ValidationError(format!(
                "Unsupported PHP version: {} (supported: {})",
                version,
                self.php.versions.join(", ")
            )));
        }
        Ok(())
    }

    /// Write the site's pool under `version` and reload that FPM
    pub async fn create_pool(&self, site_id: &str, version: &str) -> Result<(), AgentError> {
        self.ensure_supported(version)?;

        let file = self.pool_file(site_id, version);
        file.write_atomic(self.render_pool(site_id, version).as_bytes())
            .await?;
        self.reload(version).await?;

        info!("Created PHP-FPM pool for {} (PHP {})", site_id, version);
        Ok(())
    }

    /// Remove the site's pool under `version`. Returns false if there was none.
    pub async fn delete_pool(&self, site_id: &str, version: &str) -> Result<bool, AgentError> {
        if !self.pool_file(site_id, version).delete().await? {
            debug!("No PHP {} pool for {}", version, site_id);
            return Ok(false);
        }
        self.reload(version).await?;

        info!("Deleted PHP-FPM pool for {} (PHP {})", site_id, version);
        Ok(true)
    }

    /// Move the site's pool from `old` to `new`.
    ///
    /// Fails before touching anything if `new` is unsupported or not
    /// installed. If creating the new pool fails the old one is put back.
    pub async fn switch_version(&self, site_id: &str, old: &str, new: &str) -> Result<(), AgentError> {
        self.ensure_supported(new)?;
        if !self.is_installed(new).await {
            return Err(AgentError::ValidationError(format!(
                "PHP {} is not installed",
                new
            )));
        }

        self.delete_pool(site_id, old).await?;
        if let Err(e) = self.create_pool(site_id, new).await {
            warn!("Creating PHP {} pool for {} failed, restoring PHP {}", new, site_id, old);
            if let Err(cleanup_err) = self.pool_file(site_id, new).delete().await {
                warn!("Removing PHP {} pool for {} failed: {}", new, site_id, cleanup_err);
            }
            if let Err(restore_err) = self.create_pool(site_id, old).await {
                warn!("Restoring PHP {} pool for {} failed: {}", old, site_id, restore_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// `systemctl reload php<version>-fpm`
    pub async fn reload(&self, version: &str) -> Result<(), AgentError> {
        let spec = CommandSpec::new(&self.systemctl).args(["reload", &Self::fpm_service(version)]);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(AgentError::ExternalTool(format!(
                "PHP {} FPM reload failed: {}",
                version,
                output.diagnostic()
            )));
        }
        Ok(())
    }

    /// Whether `php<version> -v` runs
    pub async fn is_installed(&self, version: &str) -> bool {
        let spec = CommandSpec::new(self.versioned_binary(version)).arg("-v");
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }

    /// Configured versions that are actually installed
    pub async fn installed_versions(&self) -> Vec<String> {
        let mut installed = Vec::new();
        for version in &self.php.versions {
            if self.is_installed(version).await {
                installed.push(version.clone());
            }
        }
        installed
    }

    /// `None` if the version is not installed
    pub async fn php_info(&self, version: &str) -> Option<PhpInfo> {
        let spec = CommandSpec::new(self.versioned_binary(version)).arg("-v");
        let output = match self.runner.run(&spec).await {
            Ok(output) if output.success() => output,
            _ => return None,
        };
        let full_version = output.stdout.lines().next().unwrap_or_default().trim().to_string();

        let status_spec = CommandSpec::new(&self.systemctl).args(["is-active", &Self::fpm_service(version)]);
        let status = match self.runner.run(&status_spec).await {
            Ok(output) => output.stdout.trim().to_string(),
            Err(_) => String::new(),
        };

        Some(PhpInfo {
            version: version.to_string(),
            full_version,
            status,
        })
    }
}
