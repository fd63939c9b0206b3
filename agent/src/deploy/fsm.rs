//! Finite State Machine for deploys

use chrono::Utc;

use crate::errors::AgentError;
use crate::models::deploy::{Deploy, DeployStatus};

/// Deploy event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    /// The pipeline picked the deploy up
    Start,

    /// Every step completed
    Succeed,

    /// A step failed, the deploy timed out or was interrupted
    Fail(String),

    /// Explicit rollback request
    RollBack,
}

/// Next status for `event` in `state`, or an error for an invalid transition
pub fn next_status(state: DeployStatus, event: &DeployEvent) -> Result<DeployStatus, AgentError> {
    let next = match (state, event) {
        (DeployStatus::Pending, DeployEvent::Start) => DeployStatus::InProgress,

        (DeployStatus::InProgress, DeployEvent::Succeed) => DeployStatus::Success,
        (DeployStatus::InProgress, DeployEvent::Fail(_)) => DeployStatus::Failed,

        // Interrupted before a worker ever ran it
        (DeployStatus::Pending, DeployEvent::Fail(_)) => DeployStatus::Failed,

        (DeployStatus::RolledBack, DeployEvent::RollBack) => {
            return Err(AgentError::ValidationError(
                "Deploy is already rolled back".to_string(),
            ));
        }
        (_, DeployEvent::RollBack) => DeployStatus::RolledBack,

        (state, event) => {
            return Err(AgentError::ValidationError(format!(
                "Invalid deploy transition: {} -> {:?}",
                state, event
            )));
        }
    };
    Ok(next)
}

/// Apply `event` to `deploy`, maintaining `error` and `completed_at`.
///
/// `completed_at` is set on the first entry into a terminal state and never
/// overwritten afterwards.
pub fn apply(deploy: &mut Deploy, event: DeployEvent) -> Result<(), AgentError> {
    let next = next_status(deploy.status, &event)?;

    if let DeployEvent::Fail(message) = event {
        deploy.error = Some(message);
    }
    if next.is_terminal() && deploy.completed_at.is_none() {
        deploy.completed_at = Some(Utc::now());
    }
    deploy.status = next;
    Ok(())
}
