//! nginx virtual host generator

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::AgentError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::filesys::file::File;
use crate::models::site::{Site, SiteType};
use crate::sites::php_fpm::socket_path;
use crate::sites::templates::{fastcgi_env, render, template_for};
use crate::storage::settings::NginxSettings;

pub struct VhostGenerator {
    nginx: NginxSettings,
    php_socket_dir: PathBuf,
    systemctl: String,
    runner: Arc<dyn CommandRunner>,
}

impl VhostGenerator {
    pub fn new(
        nginx: NginxSettings,
        php_socket_dir: PathBuf,
        systemctl: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            nginx,
            php_socket_dir,
            systemctl: systemctl.into(),
            runner,
        }
    }

    /// `sites-available/<site_id>`
    pub fn config_file(&self, site_id: &str) -> File {
        File::new(self.nginx.sites_available.join(site_id))
    }

    /// `sites-enabled/<site_id>`
    pub fn enabled_link(&self, site_id: &str) -> File {
        File::new(self.nginx.sites_enabled.join(site_id))
    }

    /// Render the server block for `site`
    pub fn render(&self, site: &Site) -> Result<String, AgentError> {
        let site_id = site.site_id();
        let mut vars = vec![
            ("domain", site.domain.clone()),
            ("root_path", site.document_root().to_string_lossy().into_owned()),
            ("site_id", site_id.clone()),
            ("ssl_enabled", site.ssl_enabled.to_string()),
            ("log_dir", self.nginx.log_dir.to_string_lossy().into_owned()),
        ];

        if site.uses_php_pool() {
            let version = site.php_version.as_deref().ok_or_else(|| {
                AgentError::ValidationError(format!("Site {} has no PHP version", site.domain))
            })?;
            let socket = socket_path(&self.php_socket_dir, &site_id, version);
            vars.push(("php_version", version.to_string()));
            vars.push(("php_socket", socket.to_string_lossy().into_owned()));
            vars.push(("fastcgi_env", fastcgi_env(&site.metadata)));
        }

        match site.site_type {
            SiteType::Python => vars.push(("upstream_port", self.nginx.python_upstream_port.to_string())),
            SiteType::Nodejs => vars.push(("upstream_port", self.nginx.nodejs_upstream_port.to_string())),
            _ => {}
        }

        Ok(render(template_for(site.site_type), &vars))
    }

    /// Write and enable the site's config, then check the whole nginx config.
    ///
    /// When the check fails the previous config of the site is restored (or
    /// the new one removed if there was none) and an error is returned; nginx
    /// is not reloaded here.
    pub async fn install(&self, site: &Site) -> Result<(), AgentError> {
        let site_id = site.site_id();
        let rendered = self.render(site)?;

        let config = self.config_file(&site_id);
        let previous = if config.exists().await {
            Some(config.read_string().await?)
        } else {
            None
        };

        config.write_atomic(rendered.as_bytes()).await?;
        self.enable(&site_id).await?;

        if let Err(e) = self.test_config().await {
            warn!("nginx rejected config for {}, reverting", site.domain);
            match previous {
                Some(contents) => config.write_atomic(contents.as_bytes()).await?,
                None => {
                    self.remove(&site_id).await?;
                }
            }
            return Err(e);
        }

        info!("Installed nginx config for {} at {}", site.domain, config.path().display());
        Ok(())
    }

    #[cfg(unix)]
    async fn enable(&self, site_id: &str) -> Result<(), AgentError> {
        let target = self.config_file(site_id);
        self.enabled_link(site_id).link_to(target.path()).await
    }

    #[cfg(not(unix))]
    async fn enable(&self, _site_id: &str) -> Result<(), AgentError> {
        Err(AgentError::ConfigError(
            "enabling nginx sites requires symlink support".to_string(),
        ))
    }

    /// Remove the enabled link and the config file.
    /// Returns false if neither existed.
    pub async fn remove(&self, site_id: &str) -> Result<bool, AgentError> {
        let unlinked = self.enabled_link(site_id).delete().await?;
        let deleted = self.config_file(site_id).delete().await?;
        if unlinked || deleted {
            info!("Removed nginx config for {}", site_id);
        }
        Ok(unlinked || deleted)
    }

    /// `nginx -t`
    pub async fn test_config(&self) -> Result<(), AgentError> {
        let output = self
            .runner
            .run(&CommandSpec::new(&self.nginx.binary).arg("-t"))
            .await?;
        if !output.success() {
            return Err(AgentError::ExternalTool(format!(
                "nginx configuration test failed: {}",
                output.diagnostic()
            )));
        }
        Ok(())
    }

    /// `systemctl reload nginx`
    pub async fn reload(&self) -> Result<(), AgentError> {
        let output = self
            .runner
            .run(&CommandSpec::new(&self.systemctl).args(["reload", "nginx"]))
            .await?;
        if !output.success() {
            return Err(AgentError::ExternalTool(format!(
                "nginx reload failed: {}",
                output.diagnostic()
            )));
        }
        info!("Reloaded nginx");
        Ok(())
    }
}
