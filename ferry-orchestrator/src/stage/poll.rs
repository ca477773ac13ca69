//! Bounded, cancellable polling of an external operation

use ferry_adapters::AdapterError;
use ferry_core::domain::error::RunError;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{StageContext, bounded, cancelled};

/// Query an operation every poll interval until `done` holds for its status
///
/// Transient query failures are logged and polled through. A cancellation
/// signal is observed within one poll interval; reaching `deadline` yields a
/// retriable `Timeout`. Any other query failure ends the wait.
pub(crate) async fn poll_until<T, F, Fut>(
    ctx: &StageContext<'_>,
    deadline: Instant,
    handle: &str,
    mut query: F,
    done: impl Fn(&T) -> bool,
) -> Result<T, RunError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        match bounded(ctx, deadline, "status query", query()).await? {
            Ok(status) if done(&status) => return Ok(status),
            Ok(_) => debug!(handle = %handle, polls, "Operation still running"),
            Err(e) if e.is_transient() => {
                warn!(handle = %handle, error = %e, "Transient error while polling")
            }
            Err(e) => return Err(e.into_run_error()),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(RunError::timeout(format!(
                "operation {} not finished after {:?} ({} polls)",
                handle, ctx.timeout, polls
            )));
        }

        // Never sleep past the deadline; the last query happens right at it
        let nap = ctx.poll_interval.min(deadline - now);
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
