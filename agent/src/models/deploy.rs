//! Deploy models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deploy status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    RolledBack,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Pending => "pending",
            DeployStatus::InProgress => "in_progress",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
            DeployStatus::RolledBack => "rolled_back",
        }
    }

    /// `pending` and `in_progress` are the only non-terminal states
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeployStatus::Pending | DeployStatus::InProgress)
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a deploy's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl DeployLogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Options a deploy was requested with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Branch to deploy; the site's branch when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    /// Discard local working-tree changes before pulling
    #[serde(default)]
    pub force: bool,

    #[serde(default)]
    pub run_migrations: bool,

    #[serde(default = "default_true")]
    pub clear_cache: bool,

    #[serde(default = "default_true")]
    pub install_dependencies: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            git_branch: None,
            force: false,
            run_migrations: false,
            clear_cache: true,
            install_dependencies: true,
        }
    }
}

/// One execution of the deploy pipeline for a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    /// Unique deploy ID (UUID)
    pub id: String,

    /// Owning site's ID
    pub site_id: String,

    /// Per-site sequence number, 1 for the first deploy of a site
    pub number: u64,

    pub status: DeployStatus,

    pub git_branch: String,

    #[serde(default)]
    pub commit_hash: Option<String>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Append-only, in execution order
    #[serde(default)]
    pub logs: Vec<DeployLogEntry>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: DeployOptions,

    pub created_at: DateTime<Utc>,
}

impl Deploy {
    /// A fresh `pending` deploy. The store assigns `number` on insert.
    pub fn pending(site_id: &str, git_branch: &str, options: DeployOptions) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            number: 0,
            status: DeployStatus::Pending,
            git_branch: git_branch.to_string(),
            commit_hash: None,
            started_at: Some(now),
            completed_at: None,
            logs: Vec::new(),
            error: None,
            metadata: options,
            created_at: now,
        }
    }

    pub fn log_messages(&self) -> Vec<&str> {
        self.logs.iter().map(|l| l.message.as_str()).collect()
    }
}
