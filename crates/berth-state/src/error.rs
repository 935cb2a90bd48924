//! Store errors.
//!
//! redb failures are flattened to the operation that failed plus the
//! backend message; JSON codec failures keep their source.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage failure during {op}: {message}")]
    Storage { op: &'static str, message: String },

    #[error("cannot {op} record: {source}")]
    Codec {
        op: &'static str,
        source: serde_json::Error,
    },

    #[error("container {0} not found")]
    NotFound(String),

    #[error("container {0} already recorded")]
    AlreadyExists(String),

    #[error("node {0} already registered")]
    NodeExists(String),
}
