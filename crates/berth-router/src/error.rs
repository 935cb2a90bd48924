//! Router error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("Backend already exists: {0}")]
    BackendExists(String),

    #[error("Route {address} not found in backend {backend}")]
    RouteNotFound { backend: String, address: String },

    #[error("Backend {0} has no routes")]
    NoRoutes(String),
}

pub type RouterResult<T> = Result<T, RouterError>;
