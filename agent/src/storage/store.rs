//! Site and deploy records
//!
//! Entities are plain data; every read and write goes through [`Repository`].
//! [`Store`] keeps all records in memory and, when opened on a directory,
//! mirrors each record to its own JSON file with atomic replace.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::deploy::{Deploy, DeployLogEntry};
use crate::models::site::Site;
use crate::storage::layout::StorageLayout;

/// Persistence operations the orchestration engine needs
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a new site. Fails if the id or domain is already taken.
    async fn insert_site(&self, site: &Site) -> Result<(), AgentError>;

    async fn get_site(&self, id: &str) -> Result<Option<Site>, AgentError>;

    async fn find_site_by_domain(&self, domain: &str) -> Result<Option<Site>, AgentError>;

    /// All sites, most recently created first
    async fn list_sites(&self) -> Result<Vec<Site>, AgentError>;

    async fn update_site(&self, site: &Site) -> Result<(), AgentError>;

    /// Delete a site and, with it, all of its deploys
    async fn delete_site(&self, id: &str) -> Result<(), AgentError>;

    /// Insert a new deploy, assigning its per-site sequence number
    async fn insert_deploy(&self, deploy: Deploy) -> Result<Deploy, AgentError>;

    async fn get_deploy(&self, id: &str) -> Result<Option<Deploy>, AgentError>;

    /// Replace a deploy record. The stored log is kept if it is longer than the
    /// caller's copy, so a stale snapshot can never truncate the audit trail.
    async fn update_deploy(&self, deploy: &Deploy) -> Result<(), AgentError>;

    /// Append one entry to a deploy's log and persist it
    async fn append_log(&self, deploy_id: &str, message: &str) -> Result<DeployLogEntry, AgentError>;

    /// Deploys of a site, most recent first
    async fn list_deploys(&self, site_id: &str, limit: usize) -> Result<Vec<Deploy>, AgentError>;
}

#[derive(Default)]
struct Records {
    sites: HashMap<String, Site>,
    deploys: HashMap<String, Deploy>,
}

/// In-memory record store with optional JSON persistence
pub struct Store {
    layout: Option<StorageLayout>,
    records: RwLock<Records>,
}

impl Store {
    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            layout: None,
            records: RwLock::new(Records::default()),
        }
    }

    /// Open (or initialize) a store persisted under `layout`
    pub async fn open(layout: StorageLayout) -> Result<Self, AgentError> {
        layout.setup().await?;

        let mut records = Records::default();
        for path in layout.sites_dir().list_files_with_ext("json").await? {
            let file = File::new(&path);
            match file.read_json::<Site>().await {
                Ok(site) => {
                    records.sites.insert(site.id.clone(), site);
                }
                Err(e) => warn!("Skipping unreadable site record {}: {}", path.display(), e),
            }
        }
        for path in layout.deploys_dir().list_files_with_ext("json").await? {
            let file = File::new(&path);
            match file.read_json::<Deploy>().await {
                Ok(deploy) => {
                    records.deploys.insert(deploy.id.clone(), deploy);
                }
                Err(e) => warn!("Skipping unreadable deploy record {}: {}", path.display(), e),
            }
        }

        info!(
            "Loaded {} sites and {} deploys from {}",
            records.sites.len(),
            records.deploys.len(),
            layout.base_dir.display()
        );

        Ok(Self {
            layout: Some(layout),
            records: RwLock::new(records),
        })
    }

    async fn persist_site(&self, site: &Site) -> Result<(), AgentError> {
        if let Some(layout) = &self.layout {
            layout
                .sites_dir()
                .file(&format!("{}.json", site.id))
                .write_json(site)
                .await
                .map_err(|e| AgentError::StorageError(format!("writing site {}: {}", site.id, e)))?;
        }
        Ok(())
    }

    async fn persist_deploy(&self, deploy: &Deploy) -> Result<(), AgentError> {
        if let Some(layout) = &self.layout {
            layout
                .deploys_dir()
                .file(&format!("{}.json", deploy.id))
                .write_json(deploy)
                .await
                .map_err(|e| {
                    AgentError::StorageError(format!("writing deploy {}: {}", deploy.id, e))
                })?;
        }
        Ok(())
    }

    async fn remove_deploy_file(&self, deploy_id: &str) -> Result<(), AgentError> {
        if let Some(layout) = &self.layout {
            layout
                .deploys_dir()
                .file(&format!("{}.json", deploy_id))
                .delete()
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for Store {
    async fn insert_site(&self, site: &Site) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        if records.sites.contains_key(&site.id) {
            return Err(AgentError::StorageError(format!("site {} already exists", site.id)));
        }
        if records.sites.values().any(|s| s.domain == site.domain) {
            return Err(AgentError::ValidationError(format!(
                "A site already exists for domain {}",
                site.domain
            )));
        }
        self.persist_site(site).await?;
        records.sites.insert(site.id.clone(), site.clone());
        debug!(site_id = %site.id, "Inserted site");
        Ok(())
    }

    async fn get_site(&self, id: &str) -> Result<Option<Site>, AgentError> {
        Ok(self.records.read().await.sites.get(id).cloned())
    }

    async fn find_site_by_domain(&self, domain: &str) -> Result<Option<Site>, AgentError> {
        let records = self.records.read().await;
        Ok(records.sites.values().find(|s| s.domain == domain).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<Site>, AgentError> {
        let records = self.records.read().await;
        let mut sites: Vec<Site> = records.sites.values().cloned().collect();
        sites.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.domain.cmp(&b.domain)));
        Ok(sites)
    }

    async fn update_site(&self, site: &Site) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        if !records.sites.contains_key(&site.id) {
            return Err(AgentError::NotFound(format!("site {}", site.id)));
        }
        let mut site = site.clone();
        site.updated_at = Utc::now();
        self.persist_site(&site).await?;
        records.sites.insert(site.id.clone(), site);
        Ok(())
    }

    async fn delete_site(&self, id: &str) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        if records.sites.remove(id).is_none() {
            return Err(AgentError::NotFound(format!("site {}", id)));
        }

        let owned: Vec<String> = records
            .deploys
            .values()
            .filter(|d| d.site_id == id)
            .map(|d| d.id.clone())
            .collect();
        for deploy_id in &owned {
            records.deploys.remove(deploy_id);
            self.remove_deploy_file(deploy_id).await?;
        }

        if let Some(layout) = &self.layout {
            layout.sites_dir().file(&format!("{}.json", id)).delete().await?;
        }
        debug!(site_id = %id, deploys = owned.len(), "Deleted site");
        Ok(())
    }

    async fn insert_deploy(&self, mut deploy: Deploy) -> Result<Deploy, AgentError> {
        let mut records = self.records.write().await;
        if !records.sites.contains_key(&deploy.site_id) {
            return Err(AgentError::NotFound(format!("site {}", deploy.site_id)));
        }
        deploy.number = records
            .deploys
            .values()
            .filter(|d| d.site_id == deploy.site_id)
            .map(|d| d.number)
            .max()
            .unwrap_or(0)
            + 1;
        self.persist_deploy(&deploy).await?;
        records.deploys.insert(deploy.id.clone(), deploy.clone());
        Ok(deploy)
    }

    async fn get_deploy(&self, id: &str) -> Result<Option<Deploy>, AgentError> {
        Ok(self.records.read().await.deploys.get(id).cloned())
    }

    async fn update_deploy(&self, deploy: &Deploy) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        let stored = records
            .deploys
            .get(&deploy.id)
            .ok_or_else(|| AgentError::NotFound(format!("deploy {}", deploy.id)))?;

        let mut updated = deploy.clone();
        if stored.logs.len() > updated.logs.len() {
            updated.logs = stored.logs.clone();
        }
        self.persist_deploy(&updated).await?;
        records.deploys.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn append_log(&self, deploy_id: &str, message: &str) -> Result<DeployLogEntry, AgentError> {
        let mut records = self.records.write().await;
        let deploy = records
            .deploys
            .get_mut(deploy_id)
            .ok_or_else(|| AgentError::NotFound(format!("deploy {}", deploy_id)))?;

        let entry = DeployLogEntry::new(message);
        deploy.logs.push(entry.clone());
        let snapshot = deploy.clone();
        self.persist_deploy(&snapshot).await?;
        Ok(entry)
    }

    async fn list_deploys(&self, site_id: &str, limit: usize) -> Result<Vec<Deploy>, AgentError> {
        let records = self.records.read().await;
        let mut deploys: Vec<Deploy> = records
            .deploys
            .values()
            .filter(|d| d.site_id == site_id)
            .cloned()
            .collect();
        deploys.sort_by(|a, b| b.number.cmp(&a.number));
        deploys.truncate(limit);
        Ok(deploys)
    }
}
