//! Per-site locks
//!
//! At most one deploy (or rollback) touches a site's working tree at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard held while a site's working tree is being changed
pub type SiteGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct SiteLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, site_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(site_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the site's lock
    pub async fn lock(&self, site_id: &str) -> SiteGuard {
        self.entry(site_id).await.lock_owned().await
    }

    /// Take the site's lock only if nobody holds it
    pub async fn try_lock(&self, site_id: &str) -> Option<SiteGuard> {
        self.entry(site_id).await.try_lock_owned().ok()
    }

    /// Forget a deleted site's lock
    pub async fn remove(&self, site_id: &str) {
        self.locks.lock().await.remove(site_id);
    }
}
