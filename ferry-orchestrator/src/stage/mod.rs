//! Stage Executors
//!
//! One executor per pipeline stage. An executor reads what it needs from the
//! run record, drives its external call to completion and reports a
//! [`StageResult`]. Executors never mutate the run themselves: pending handles
//! go through the [`Checkpoint`] the orchestrator hands them, and results are
//! committed by the orchestrator.
//!
//! Every outcome, including cancellation and timeouts, is a `StageResult`.

mod deploy;
mod poll;
mod promote;
mod train;
mod validate;

pub use deploy::DeployExecutor;
pub use promote::PromoteExecutor;
pub use train::TrainExecutor;
pub use validate::ValidateExecutor;

use async_trait::async_trait;
use ferry_adapters::{ArtifactRegistry, DeploymentService, InferenceService, TrainingService};
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::PipelineRun;
use ferry_core::domain::stage::{Stage, StageResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The four external collaborators of a run
#[derive(Clone)]
pub struct Adapters {
    pub training: Arc<dyn TrainingService>,
    pub registry: Arc<dyn ArtifactRegistry>,
    pub deployment: Arc<dyn DeploymentService>,
    pub inference: Arc<dyn InferenceService>,
}

/// Orchestrator-owned writes an executor may request mid-stage
#[async_trait]
pub trait Checkpoint: Send + Sync {
    /// Record the handle of a just-created external operation
    ///
    /// Returns the handle that is on record afterwards, which is an earlier
    /// writer's handle if one got there first.
    async fn record_pending(&self, stage: Stage, handle: &str) -> Result<String, RunError>;

    /// Forget a dead external operation
    ///
    /// Returns the idempotency token the stage's next create call must use.
    async fn discard_pending(&self, stage: Stage, handle: &str) -> Result<String, RunError>;
}

/// Everything an executor needs besides the run record
pub struct StageContext<'a> {
    pub cancel: CancellationToken,
    pub poll_interval: Duration,
    /// Ceiling for this attempt, measured from the start of `execute`
    pub timeout: Duration,
    pub validation_prompt: &'a str,
    pub checkpoint: &'a dyn Checkpoint,
}

/// Stand-in ceiling for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl StageContext<'_> {
    pub fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> StageResult;
}

/// Builds the executor for every stage, in pipeline order
pub fn executors(adapters: &Adapters) -> Vec<Arc<dyn StageExecutor>> {
    vec![
        Arc::new(TrainExecutor::new(Arc::clone(&adapters.training))),
        Arc::new(PromoteExecutor::new(Arc::clone(&adapters.registry))),
        Arc::new(DeployExecutor::new(Arc::clone(&adapters.deployment))),
        Arc::new(ValidateExecutor::new(Arc::clone(&adapters.inference))),
    ]
}

pub(crate) fn cancelled() -> RunError {
    RunError::cancelled("run cancelled")
}

/// Runs `fut` until it completes, the run is cancelled or `deadline` passes
pub(crate) async fn bounded<T>(
    ctx: &StageContext<'_>,
    deadline: Instant,
    what: &str,
    fut: impl Future<Output = T>,
) -> Result<T, RunError> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(cancelled()),
        res = tokio::time::timeout_at(deadline, fut) => res.map_err(|_| {
            RunError::timeout(format!("{} did not finish within {:?}", what, ctx.timeout))
        }),
    }
}

/// Output of an earlier stage the executor depends on
pub(crate) fn prior_output(run: &PipelineRun, stage: Stage) -> Result<&str, RunError> {
    run.succeeded_output(stage).ok_or_else(|| {
        RunError::new(
            ErrorKind::Internal,
            format!("run {} has no successful {} output", run.run_id, stage),
        )
    })
}
