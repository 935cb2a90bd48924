//! Executor error types.

use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("remote command failed ({})", exit_status(*.status))]
    Failed {
        status: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
}

impl ExecError {
    /// Standard error captured from a failed command, if any.
    pub fn stderr(&self) -> &[u8] {
        match self {
            ExecError::Failed { stderr, .. } => stderr,
            ExecError::Spawn { .. } => &[],
        }
    }
}

fn exit_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_renders_exit_status() {
        let err = ExecError::Failed {
            status: Some(1),
            stdout: Vec::new(),
            stderr: b"permission denied".to_vec(),
        };
        assert_eq!(err.to_string(), "remote command failed (exit status 1)");
        assert_eq!(err.stderr(), b"permission denied");

        let err = ExecError::Failed {
            status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        assert_eq!(err.to_string(), "remote command failed (terminated by signal)");
    }
}
