//! Capturing executor for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExecError;
use crate::{ExecFuture, ExecOutput, Executor};

/// Key matching any command line or any target.
const ANY: &str = "*";

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCmd {
    pub target: String,
    pub cmd: String,
    pub args: Vec<String>,
}

impl ExecutedCmd {
    /// `cmd args…` joined by spaces.
    pub fn command_line(&self) -> String {
        command_line(&self.cmd, &self.args)
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ExecutedCmd>,
    /// Targets whose call has returned, in completion order.
    finished: Vec<String>,
    forgotten: Vec<String>,
    /// Canned stdout keyed by target; wins over `outputs`.
    target_outputs: HashMap<String, Vec<u8>>,
    /// Canned stdout keyed by command line, or `*`.
    outputs: HashMap<String, Vec<u8>>,
    /// Time a call against the target takes before returning.
    delays: HashMap<String, Duration>,
    /// Canned stderr of failing targets, keyed by target, or `*`.
    failures: HashMap<String, Vec<u8>>,
}

/// Executor that records calls and replies from canned output.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    state: Arc<Mutex<FakeState>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply `stdout` to `command_line` (`"cmd arg…"`), or to every command with `"*"`.
    pub fn with_output(self, command_line: &str, stdout: impl Into<Vec<u8>>) -> Self {
        self.lock().outputs.insert(command_line.to_string(), stdout.into());
        self
    }

    /// Reply `stdout` to every command run against `target`.
    pub fn with_output_for(self, target: &str, stdout: impl Into<Vec<u8>>) -> Self {
        self.lock()
            .target_outputs
            .insert(target.to_string(), stdout.into());
        self
    }

    /// Hold every call against `target` for `delay` before it returns.
    pub fn with_delay(self, target: &str, delay: Duration) -> Self {
        self.lock().delays.insert(target.to_string(), delay);
        self
    }

    /// Make every command fail with `stderr`.
    pub fn failing(self, stderr: impl Into<Vec<u8>>) -> Self {
        self.fail_on(ANY, stderr)
    }

    /// Make commands against `target` fail with `stderr`.
    pub fn fail_on(self, target: &str, stderr: impl Into<Vec<u8>>) -> Self {
        self.lock().failures.insert(target.to_string(), stderr.into());
        self
    }

    /// Every invocation so far, in call order.
    pub fn calls(&self) -> Vec<ExecutedCmd> {
        self.lock().calls.clone()
    }

    /// Targets of calls that have returned, in completion order.
    pub fn finished(&self) -> Vec<String> {
        self.lock().finished.clone()
    }

    /// Addresses passed to `forget_host`, in call order.
    pub fn forgotten_hosts(&self) -> Vec<String> {
        self.lock().forgotten.clone()
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.finished.clear();
        state.forgotten.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake executor lock")
    }
}

impl Executor for FakeExecutor {
    fn run<'a>(
        &'a self,
        target: &'a str,
        cmd: &'a str,
        args: &'a [String],
    ) -> ExecFuture<'a, ExecOutput> {
        let (result, delay) = {
            let mut state = self.lock();
            state.calls.push(ExecutedCmd {
                target: target.to_string(),
                cmd: cmd.to_string(),
                args: args.to_vec(),
            });
            let failure = state
                .failures
                .get(target)
                .or_else(|| state.failures.get(ANY))
                .cloned();
            let result = match failure {
                Some(stderr) => Err(ExecError::Failed {
                    status: Some(1),
                    stdout: Vec::new(),
                    stderr,
                }),
                None => {
                    let stdout = state
                        .target_outputs
                        .get(target)
                        .or_else(|| state.outputs.get(&command_line(cmd, args)))
                        .or_else(|| state.outputs.get(ANY))
                        .cloned()
                        .unwrap_or_default();
                    Ok(ExecOutput::stdout(stdout))
                }
            };
            (result, state.delays.get(target).copied())
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.lock().finished.push(target.to_string());
            result
        })
    }

    fn forget_host<'a>(&'a self, ip: &'a str) -> ExecFuture<'a, ()> {
        self.lock().forgotten.push(ip.to_string());
        Box::pin(async { Ok(()) })
    }
}

fn command_line(cmd: &str, args: &[String]) -> String {
    std::iter::once(cmd)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
