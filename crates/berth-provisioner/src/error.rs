//! Provisioner error types.
//!
//! Validation errors carry the exact message shown to callers; everything
//! else wraps the collaborator that failed.

use berth_action::PipelineError;
use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("container {0} has no published address")]
    NoAddress(String),

    #[error("{source}; rollback incomplete: {}", .failures.join("; "))]
    RollbackIncomplete {
        source: Box<ProvisionError>,
        failures: Vec<String>,
    },

    #[error("failed to destroy {app}: {}", .errors.join("; "))]
    Destroy { app: String, errors: Vec<String> },

    #[error("state store error: {0}")]
    State(#[from] berth_state::StateError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] berth_scheduler::SchedulerError),

    #[error("router error: {0}")]
    Router(#[from] berth_router::RouterError),

    #[error("engine error: {0}")]
    Engine(#[from] berth_engine::EngineError),

    #[error("{0}")]
    Exec(#[from] berth_exec::ExecError),

    #[error("remote command task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub(crate) fn cannot_add_zero_units() -> Self {
        ProvisionError::InvalidArgument("Cannot add 0 units".to_string())
    }

    pub(crate) fn not_deployed() -> Self {
        ProvisionError::PreconditionFailed(
            "New units can only be added after the first deployment".to_string(),
        )
    }

    pub(crate) fn unit_not_found() -> Self {
        ProvisionError::NotFound("not found".to_string())
    }

    pub(crate) fn foreign_unit() -> Self {
        ProvisionError::PermissionDenied("Unit does not belong to this app".to_string())
    }

    pub(crate) fn no_containers() -> Self {
        ProvisionError::NotFound("No containers for this app".to_string())
    }

    /// The step failure, wrapped with any rollback failures it left behind.
    pub(crate) fn from_pipeline(err: PipelineError<ProvisionError>) -> Self {
        if err.rollback_errors.is_empty() {
            return err.source;
        }
        let failures = err
            .rollback_errors
            .iter()
            .map(|r| format!("{}: {}", r.action, r.error))
            .collect();
        ProvisionError::RollbackIncomplete {
            source: Box::new(err.source),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_exact() {
        assert_eq!(ProvisionError::cannot_add_zero_units().to_string(), "Cannot add 0 units");
        assert_eq!(
            ProvisionError::not_deployed().to_string(),
            "New units can only be added after the first deployment"
        );
        assert_eq!(ProvisionError::unit_not_found().to_string(), "not found");
        assert_eq!(
            ProvisionError::foreign_unit().to_string(),
            "Unit does not belong to this app"
        );
        assert_eq!(ProvisionError::no_containers().to_string(), "No containers for this app");
    }

    #[test]
    fn clean_rollback_returns_the_step_failure() {
        let err = ProvisionError::from_pipeline(PipelineError {
            action: "run_hooks",
            source: ProvisionError::NoAddress("c-1".to_string()),
            rollback_errors: Vec::new(),
        });
        assert!(matches!(err, ProvisionError::NoAddress(id) if id == "c-1"));
    }

    #[test]
    fn failed_rollback_is_reported_with_the_step_failure() {
        let err = ProvisionError::from_pipeline(PipelineError {
            action: "run_hooks",
            source: ProvisionError::NoAddress("c-1".to_string()),
            rollback_errors: vec![berth_action::RollbackError {
                action: "create_container",
                error: ProvisionError::NotFound("gone".to_string()),
            }],
        });
        assert_eq!(
            err.to_string(),
            "container c-1 has no published address; rollback incomplete: create_container: gone"
        );
    }

    #[test]
    fn destroy_lists_every_failure() {
        let err = ProvisionError::Destroy {
            app: "myapp".to_string(),
            errors: vec!["c-1: boom".to_string(), "c-2: bang".to_string()],
        };
        assert_eq!(err.to_string(), "failed to destroy myapp: c-1: boom; c-2: bang");
    }
}
