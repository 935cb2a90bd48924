//! berth-exec — runs commands inside running units.
//!
//! The [`Executor`] trait is the seam between the provisioner and the
//! remote shell. Production uses [`SshExecutor`]; tests inject a
//! [`FakeExecutor`] that records every call and never touches the network.

pub mod error;
pub mod fake;
pub mod ssh;

use std::future::Future;
use std::pin::Pin;

pub use error::{ExecError, ExecResult};
pub use fake::{ExecutedCmd, FakeExecutor};
pub use ssh::SshExecutor;

/// Boxed future returned by executor operations.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = ExecResult<T>> + Send + 'a>>;

/// Captured output of a successful remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }
}

/// Remote command execution — injected into the provisioner for testability.
pub trait Executor: Send + Sync {
    /// Run `cmd args…` on the unit reachable at `target`.
    fn run<'a>(&'a self, target: &'a str, cmd: &'a str, args: &'a [String])
    -> ExecFuture<'a, ExecOutput>;

    /// Drop any remembered host key for `ip`, e.g. after a unit changed address.
    fn forget_host<'a>(&'a self, ip: &'a str) -> ExecFuture<'a, ()>;
}
