//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No nodes available")]
    NoNodesAvailable,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already registered: {0}")]
    NodeExists(String),

    #[error("state store error: {0}")]
    State(#[from] berth_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
