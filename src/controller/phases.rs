//! Ordered step pipeline shared by the reconcilers.
//!
//! A reconcile pass is a list of named steps. Each step either lets the
//! pass continue or finishes it with an [`Action`]. Deletion handling,
//! skip markers and readiness gates all short-circuit the same way.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use kube::runtime::controller::Action;
use tracing::debug;

use crate::controller::context::Context;
use crate::controller::error::Error;

/// Requeue interval during steady state.
pub const REQUEUE_STEADY: Duration = Duration::from_secs(10);
/// Requeue interval while waiting on node-count convergence.
pub const REQUEUE_CONVERGING: Duration = Duration::from_secs(60);
/// Requeue interval for a cluster with zero desired leaders.
pub const REQUEUE_IDLE: Duration = Duration::from_secs(120);

/// Outcome of one pipeline step.
pub enum StepOutcome {
    /// Proceed to the next step.
    Continue,
    /// Finish the pass with this action.
    Done(Action),
}

/// A named step of a reconcile pipeline.
pub type Step<R> = for<'a> fn(&'a Context, &'a Arc<R>) -> BoxFuture<'a, Result<StepOutcome, Error>>;

/// Run the steps in order. The first [`StepOutcome::Done`] wins; when all
/// steps continue, the pass ends with `fallback`.
pub async fn run<R>(
    ctx: &Context,
    obj: &Arc<R>,
    steps: &[(&str, Step<R>)],
    fallback: Action,
) -> Result<Action, Error> {
    for (name, step) in steps {
        debug!(step = %name, "Running reconcile step");
        match step(ctx, obj).await? {
            StepOutcome::Continue => {}
            StepOutcome::Done(action) => {
                debug!(step = %name, "Reconcile pass finished");
                return Ok(action);
            }
        }
    }
    Ok(fallback)
}
