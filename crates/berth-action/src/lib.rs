//! berth-action — ordered steps that undo themselves on failure.
//!
//! A [`Pipeline`] runs each [`Action`]'s `forward` in order against a shared
//! context. When step *k* fails, steps *k-1 … 0* have their `backward` run
//! in reverse with the context as it stood at the failure. Rollback errors
//! are logged and collected; they never replace the original failure.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, error, warn};

/// Boxed future returned by action steps.
pub type ActionFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;

/// One compensable step.
pub trait Action<C, E>: Send + Sync {
    fn name(&self) -> &'static str;

    fn forward<'a>(&'a self, ctx: &'a mut C) -> ActionFuture<'a, E>;

    /// Undo a successful `forward`. Only called after a later step failed.
    fn backward<'a>(&'a self, ctx: &'a mut C) -> ActionFuture<'a, E>;
}

/// A `backward` that failed while unwinding.
#[derive(Debug)]
pub struct RollbackError<E> {
    pub action: &'static str,
    pub error: E,
}

/// Forward failure of a pipeline, with whatever went wrong while unwinding.
#[derive(Debug, Error)]
#[error("{action} failed: {source}")]
pub struct PipelineError<E>
where
    E: std::error::Error + 'static,
{
    pub action: &'static str,
    pub source: E,
    pub rollback_errors: Vec<RollbackError<E>>,
}

impl<E> PipelineError<E>
where
    E: std::error::Error + 'static,
{
    pub fn into_source(self) -> E {
        self.source
    }
}

pub struct Pipeline<C, E> {
    actions: Vec<Box<dyn Action<C, E>>>,
}

impl<C, E> Pipeline<C, E>
where
    C: Send,
    E: std::error::Error + 'static,
{
    pub fn new(actions: Vec<Box<dyn Action<C, E>>>) -> Self {
        Self { actions }
    }

    /// Run every step forward, unwinding completed steps on the first failure.
    pub async fn execute(&self, ctx: &mut C) -> Result<(), PipelineError<E>> {
        for (idx, action) in self.actions.iter().enumerate() {
            debug!(action = action.name(), "forward");
            if let Err(source) = action.forward(ctx).await {
                error!(action = action.name(), error = %source, "action failed, rolling back");
                let mut rollback_errors = Vec::new();
                for done in self.actions[..idx].iter().rev() {
                    debug!(action = done.name(), "backward");
                    if let Err(e) = done.backward(ctx).await {
                        warn!(action = done.name(), error = %e, "rollback step failed");
                        rollback_errors.push(RollbackError {
                            action: done.name(),
                            error: e,
                        });
                    }
                }
                return Err(PipelineError {
                    action: action.name(),
                    source,
                    rollback_errors,
                });
            }
        }
        Ok(())
    }
}
