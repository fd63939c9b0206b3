//! Site provisioning
//!
//! Realizes a site's filesystem, git checkout, nginx and PHP-FPM state. Steps
//! run in a fixed order and are not compensated: once a step with side
//! effects has run, a later failure is reported as a partial failure and the
//! site must be reconciled by retrying or by hand.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::deploy::git::GitSync;
use crate::deploy::locks::SiteLocks;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::models::site::{
    default_branch, normalize_domain, site_id_for, validate_branch, validate_domain,
    validate_git_repo, CreatedSite, Site, SiteChanges, SiteSpec, SiteStatus,
};
use crate::sites::php_fpm::PoolManager;
use crate::sites::vhost::VhostGenerator;
use crate::storage::store::Repository;

const CREATE: &str = "create site";
const UPDATE: &str = "update site";
const DELETE: &str = "delete site";

pub struct SiteProvisioner {
    store: Arc<dyn Repository>,
    git: GitSync,
    vhosts: Arc<VhostGenerator>,
    pools: Arc<PoolManager>,
    locks: Arc<SiteLocks>,
    sites_dir: PathBuf,
}

impl SiteProvisioner {
    pub fn new(
        store: Arc<dyn Repository>,
        git: GitSync,
        vhosts: Arc<VhostGenerator>,
        pools: Arc<PoolManager>,
        locks: Arc<SiteLocks>,
        sites_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            git,
            vhosts,
            pools,
            locks,
            sites_dir,
        }
    }

    pub fn vhosts(&self) -> &VhostGenerator {
        &self.vhosts
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Most recently created first
    pub async fn list_sites(&self) -> Result<Vec<Site>, AgentError> {
        self.store.list_sites().await
    }

    pub async fn get_site(&self, site_id: &str) -> Result<Site, AgentError> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("site {}", site_id)))
    }

    fn check_php_version(&self, version: &str) -> Result<(), AgentError> {
        if !self.pools.settings().is_supported(version) {
            return Err(AgentError::ValidationError(format!(
                "Unsupported PHP version: {}",
                version
            )));
        }
        Ok(())
    }

    /// Create a site.
    ///
    /// A failed initial clone does not abort creation; it is reported in
    /// [`CreatedSite::clone_error`] and the site root is left empty.
    pub async fn create_site(&self, spec: SiteSpec) -> Result<CreatedSite, AgentError> {
        let domain = normalize_domain(&spec.domain);
        validate_domain(&domain)?;
        if let Some(repo) = &spec.git_repo {
            validate_git_repo(repo)?;
        }
        let branch = spec.git_branch.clone().unwrap_or_else(default_branch);
        validate_branch(&branch)?;

        let php_version = if spec.site_type.uses_php_pool() {
            let version = spec
                .php_version
                .clone()
                .unwrap_or_else(|| self.pools.settings().default_version.clone());
            self.check_php_version(&version)?;
            Some(version)
        } else {
            None
        };

        // Creations sharing a root path run one at a time, so the loser of a
        // race sees the winner's record before touching the filesystem.
        let site_id = site_id_for(&domain);
        let _guard = self.locks.lock(&format!("create:{}", site_id)).await;

        // a legacy record may still carry the `www.` form the vhost also serves
        for candidate in [domain.clone(), format!("www.{}", domain)] {
            if self.store.find_site_by_domain(&candidate).await?.is_some() {
                return Err(AgentError::ValidationError(format!(
                    "A site already exists for domain {}",
                    domain
                )));
            }
        }

        let root_path = self.sites_dir.join(&site_id);
        let taken = self
            .store
            .list_sites()
            .await?
            .into_iter()
            .any(|s| s.root_path == root_path);
        if taken {
            return Err(AgentError::ValidationError(format!(
                "Root path {} is already used by another site",
                root_path.display()
            )));
        }

        info!("Creating {} site {}", spec.site_type, domain);
        let root = Dir::new(&root_path);
        root.create().await?;

        let mut clone_error = None;
        if let Some(repo) = &spec.git_repo {
            let outcome = self.git.clone(repo, &root_path, &branch).await;
            if !outcome.success {
                warn!("Initial clone for {} failed: {}", domain, outcome.output);
                clone_error = Some(outcome.output);
                root.create()
                    .await
                    .map_err(|e| AgentError::partial(CREATE, "site directory", e))?;
            }
        }

        let now = Utc::now();
        let site = Site {
            id: uuid::Uuid::new_v4().to_string(),
            domain,
            site_type: spec.site_type,
            root_path,
            git_repo: spec.git_repo,
            git_branch: branch,
            php_version,
            ssl_enabled: spec.ssl_enabled.unwrap_or(false),
            status: SiteStatus::Active,
            metadata: spec.env_vars.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_site(&site)
            .await
            .map_err(|e| AgentError::partial(CREATE, "record", e))?;

        if let Some(version) = &site.php_version {
            self.pools
                .create_pool(&site_id, version)
                .await
                .map_err(|e| AgentError::partial(CREATE, "php-fpm pool", e))?;
        }
        self.vhosts
            .install(&site)
            .await
            .map_err(|e| AgentError::partial(CREATE, "nginx config", e))?;
        self.vhosts
            .reload()
            .await
            .map_err(|e| AgentError::partial(CREATE, "nginx reload", e))?;

        info!(site_id = %site.id, "Created site {}", site.domain);
        Ok(CreatedSite { site, clone_error })
    }

    /// Apply `changes` to a site. Domain and site type never change.
    ///
    /// A PHP version change moves the pool first, so the regenerated vhost
    /// never points at a socket that does not exist.
    pub async fn update_site(&self, site_id: &str, changes: SiteChanges) -> Result<Site, AgentError> {
        let site = self.get_site(site_id).await?;

        if let Some(branch) = &changes.git_branch {
            validate_branch(branch)?;
        }
        if let Some(version) = &changes.php_version {
            if !site.uses_php_pool() {
                return Err(AgentError::ValidationError(format!(
                    "{} sites have no PHP version",
                    site.site_type
                )));
            }
            self.check_php_version(version)?;
        }

        let fpm_id = site.site_id();
        if let Some(new_version) = &changes.php_version {
            match site.php_version.as_deref() {
                Some(old_version) if old_version == new_version => {}
                Some(old_version) => {
                    self.pools
                        .switch_version(&fpm_id, old_version, new_version)
                        .await
                        .map_err(|e| AgentError::partial(UPDATE, "php-fpm pool", e))?;
                }
                None => {
                    self.pools
                        .create_pool(&fpm_id, new_version)
                        .await
                        .map_err(|e| AgentError::partial(UPDATE, "php-fpm pool", e))?;
                }
            }
        }

        let mut updated = site.clone();
        if let Some(branch) = changes.git_branch {
            updated.git_branch = branch;
        }
        if let Some(version) = changes.php_version {
            updated.php_version = Some(version);
        }
        if let Some(ssl_enabled) = changes.ssl_enabled {
            updated.ssl_enabled = ssl_enabled;
        }
        if let Some(status) = changes.status {
            updated.status = status;
        }
        if let Some(metadata) = changes.metadata {
            updated.metadata = metadata;
        }

        self.store
            .update_site(&updated)
            .await
            .map_err(|e| AgentError::partial(UPDATE, "record", e))?;
        self.vhosts
            .install(&updated)
            .await
            .map_err(|e| AgentError::partial(UPDATE, "nginx config", e))?;
        self.vhosts
            .reload()
            .await
            .map_err(|e| AgentError::partial(UPDATE, "nginx reload", e))?;

        info!(site_id = %site.id, "Updated site {}", site.domain);
        self.get_site(site_id).await
    }

    /// Move a PHP-backed site to another PHP version
    pub async fn switch_php_version(&self, site_id: &str, version: &str) -> Result<Site, AgentError> {
        let changes = SiteChanges {
            php_version: Some(version.to_string()),
            ..Default::default()
        };
        self.update_site(site_id, changes).await
    }

    /// Tear a site down. The record goes last, so it stays the source of
    /// truth for a retry if an earlier step fails. Refused while a deploy of
    /// the site is executing.
    pub async fn delete_site(&self, site_id: &str, remove_files: bool) -> Result<(), AgentError> {
        let site = self.get_site(site_id).await?;
        let guard = self.locks.try_lock(&site.id).await.ok_or_else(|| {
            AgentError::Conflict(format!("A deploy of {} is executing", site.domain))
        })?;

        let fpm_id = site.site_id();
        if let (true, Some(version)) = (site.uses_php_pool(), site.php_version.as_deref()) {
            self.pools
                .delete_pool(&fpm_id, version)
                .await
                .map_err(|e| AgentError::partial(DELETE, "php-fpm pool", e))?;
        }
        self.vhosts
            .remove(&fpm_id)
            .await
            .map_err(|e| AgentError::partial(DELETE, "nginx config", e))?;
        self.vhosts
            .reload()
            .await
            .map_err(|e| AgentError::partial(DELETE, "nginx reload", e))?;

        if remove_files {
            Dir::new(&site.root_path)
                .delete()
                .await
                .map_err(|e| AgentError::partial(DELETE, "site files", e))?;
        }

        self.store
            .delete_site(&site.id)
            .await
            .map_err(|e| AgentError::partial(DELETE, "record", e))?;
        drop(guard);
        self.locks.remove(&site.id).await;

        info!(site_id = %site.id, "Deleted site {}", site.domain);
        Ok(())
    }

    /// Check the nginx config and reload nginx
    pub async fn reload_web_server(&self) -> Result<(), AgentError> {
        self.vhosts.test_config().await?;
        self.vhosts.reload().await
    }
}
