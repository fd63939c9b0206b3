//! Storage layout of the agent's own state

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;

/// Storage layout for the agent's records
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all agent state
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// One JSON document per site
    pub fn sites_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("sites"))
    }

    /// One JSON document per deploy
    pub fn deploys_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deploys"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.sites_dir().create().await?;
        self.deploys_dir().create().await?;
        Ok(())
    }
}
