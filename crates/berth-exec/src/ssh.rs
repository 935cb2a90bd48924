//! Remote execution over the system `ssh` client.
//!
//! Units live on a trusted private network, so host-key checking is turned
//! off and stale keys are purged with `ssh-keygen -R` when a unit moves.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};
use crate::{ExecFuture, ExecOutput, Executor};

/// Executor that shells out to `ssh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// Fixed service login used for every session.
    user: String,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            port: None,
            identity_file: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Arguments passed to `ssh` for one remote command.
    pub fn command_args(&self, target: &str, cmd: &str, args: &[String]) -> Vec<String> {
        let mut argv = vec![target.to_string(), "-l".to_string(), self.user.clone()];
        if let Some(port) = self.port {
            argv.push("-p".to_string());
            argv.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            argv.push("-i".to_string());
            argv.push(identity.to_string_lossy().into_owned());
        }
        argv.push("-o".to_string());
        argv.push("StrictHostKeyChecking no".to_string());
        argv.push("--".to_string());
        argv.push(shell_escape(cmd));
        argv.extend(args.iter().map(|a| shell_escape(a)));
        argv
    }
}

async fn run_local(program: &str, args: &[String]) -> ExecResult<ExecOutput> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    } else {
        Err(ExecError::Failed {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

impl Executor for SshExecutor {
    fn run<'a>(
        &'a self,
        target: &'a str,
        cmd: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ExecOutput> {
        Box::pin(async move {
            let argv = self.command_args(target, cmd, args);
            debug!(%target, %cmd, "running remote command");
            let result = run_local("ssh", &argv).await;
            if let Err(e) = &result {
                warn!(%target, %cmd, error = %e, "remote command failed");
            }
            result
        })
    }

    fn forget_host<'a>(&'a self, ip: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            debug!(%ip, "removing known host key");
            run_local("ssh-keygen", &["-R".to_string(), ip.to_string()]).await?;
            Ok(())
        })
    }
}

/// Escape a string for safe inclusion in the remote shell command line.
fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~".contains(c)) {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
