//! Site models

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Technology a site is built with. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Static,
    Php,
    Laravel,
    Python,
    Nodejs,
}

impl SiteType {
    pub const ALL: [SiteType; 5] = [
        SiteType::Static,
        SiteType::Php,
        SiteType::Laravel,
        SiteType::Python,
        SiteType::Nodejs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::Static => "static",
            SiteType::Php => "php",
            SiteType::Laravel => "laravel",
            SiteType::Python => "python",
            SiteType::Nodejs => "nodejs",
        }
    }

    /// Whether sites of this type get a PHP-FPM pool
    pub fn uses_php_pool(&self) -> bool {
        matches!(self, SiteType::Php | SiteType::Laravel)
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SiteType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AgentError::ValidationError(format!("Unsupported site type: {}", s)))
    }
}

/// Operational status of a site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

/// A managed web application bound to one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Unique site ID (UUID)
    pub id: String,

    /// Normalized domain (lower-case, no `www.` prefix)
    pub domain: String,

    pub site_type: SiteType,

    /// Checkout directory on the host
    pub root_path: PathBuf,

    #[serde(default)]
    pub git_repo: Option<String>,

    #[serde(default = "default_branch")]
    pub git_branch: String,

    /// Only set for PHP-backed site types
    #[serde(default)]
    pub php_version: Option<String>,

    #[serde(default)]
    pub ssl_enabled: bool,

    #[serde(default)]
    pub status: SiteStatus,

    /// Free-form variables (exposed to the application environment)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn default_branch() -> String {
    "main".to_string()
}

impl Site {
    /// Filesystem/config-safe identifier derived from the domain
    pub fn site_id(&self) -> String {
        site_id_for(&self.domain)
    }

    /// Directory the web server serves from
    pub fn document_root(&self) -> PathBuf {
        match self.site_type {
            SiteType::Laravel => self.root_path.join("public"),
            _ => self.root_path.clone(),
        }
    }

    pub fn uses_php_pool(&self) -> bool {
        self.site_type.uses_php_pool()
    }

    /// A path inside the site's checkout
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root_path.join(relative)
    }
}

/// `example.com` -> `example-com`
pub fn site_id_for(domain: &str) -> String {
    domain.replace('.', "-")
}

/// Lower-case, trim, strip every leading `www.`
pub fn normalize_domain(raw: &str) -> String {
    let domain = raw.trim().to_lowercase();
    let mut rest = domain.as_str();
    while let Some(stripped) = rest.strip_prefix("www.") {
        rest = stripped;
    }
    rest.to_string()
}

/// Check a normalized domain is usable as a server name and a path component
pub fn validate_domain(domain: &str) -> Result<(), AgentError> {
    if domain.is_empty() {
        return Err(AgentError::ValidationError("Domain is required".to_string()));
    }
    if domain.len() > 255 {
        return Err(AgentError::ValidationError(
            "Domain must be at most 255 characters".to_string(),
        ));
    }
    if !domain.contains('.') {
        return Err(AgentError::ValidationError(format!(
            "Domain must contain at least one dot: {}",
            domain
        )));
    }
    let valid_chars = domain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    if !valid_chars {
        return Err(AgentError::ValidationError(format!(
            "Domain contains invalid characters: {}",
            domain
        )));
    }
    if domain
        .split('.')
        .any(|label| label.is_empty() || label.starts_with('-') || label.ends_with('-'))
    {
        return Err(AgentError::ValidationError(format!(
            "Domain has an empty or malformed label: {}",
            domain
        )));
    }
    Ok(())
}

/// Branch names are passed to git as arguments
pub fn validate_branch(branch: &str) -> Result<(), AgentError> {
    if branch.is_empty() || branch.len() > 100 {
        return Err(AgentError::ValidationError(
            "Branch must be between 1 and 100 characters".to_string(),
        ));
    }
    if branch.starts_with('-') || branch.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AgentError::ValidationError(format!("Invalid branch name: {}", branch)));
    }
    Ok(())
}

/// Accepts `http(s)://`, `ssh://`, `git://`, `file://` URLs and scp-style
/// `user@host:path` addresses
pub fn validate_git_repo(repo: &str) -> Result<(), AgentError> {
    let invalid = || AgentError::ValidationError(format!("Invalid git repository: {}", repo));

    if repo.is_empty() || repo.starts_with('-') || repo.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    if let Ok(url) = url::Url::parse(repo) {
        return match url.scheme() {
            "http" | "https" | "ssh" | "git" | "file" => Ok(()),
            _ => Err(invalid()),
        };
    }
    match repo.split_once(':') {
        Some((host, path)) if host.contains('@') && !path.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

/// Request to create a site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSpec {
    pub domain: String,
    pub site_type: SiteType,
    #[serde(default)]
    pub git_repo: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub ssl_enabled: Option<bool>,
    #[serde(default)]
    pub env_vars: Option<BTreeMap<String, String>>,
}

impl SiteSpec {
    pub fn new(domain: impl Into<String>, site_type: SiteType) -> Self {
        Self {
            domain: domain.into(),
            site_type,
            git_repo: None,
            git_branch: None,
            php_version: None,
            ssl_enabled: None,
            env_vars: None,
        }
    }
}

/// Partial update of a site. Domain and site type are not updatable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteChanges {
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub ssl_enabled: Option<bool>,
    #[serde(default)]
    pub status: Option<SiteStatus>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Result of site creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSite {
    pub site: Site,

    /// Set when the initial clone failed; the site was still created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_error: Option<String>,
}
