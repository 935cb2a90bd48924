//! Container engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such container or image: {0}")]
    NotFound(String),

    #[error("cannot connect to engine at {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("engine error: {0}")]
    Api(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            other => EngineError::Api(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_404_maps_to_not_found() {
        let err: EngineError = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        }
        .into();
        assert!(err.is_not_found());

        let err: EngineError = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::Api(_)));
    }
}
