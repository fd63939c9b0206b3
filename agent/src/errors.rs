//! Error types for the site agent

use thiserror::Error;

/// Main error type for the site agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad input, rejected before any side effect
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource is busy (e.g. a deploy of the same site is executing)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An external tool (git, composer, nginx, systemctl...) exited non-zero.
    /// The message is the human-readable failure text.
    #[error("{0}")]
    ExternalTool(String),

    /// A provisioning step failed after earlier steps already touched the host.
    /// Nothing is compensated; the site needs manual or retried reconciliation.
    #[error("{operation} partially failed at '{step}': {message}")]
    PartialFailure {
        operation: String,
        step: String,
        message: String,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Wrap an error raised by one provisioning step
    pub fn partial(operation: &str, step: &str, err: AgentError) -> Self {
        match err {
            // Nothing was mutated by a rejected input, keep it as-is
            AgentError::ValidationError(_) => err,
            other => AgentError::PartialFailure {
                operation: operation.to_string(),
                step: step.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
