//! Train stage: submit a tuning job and wait for its verdict

use async_trait::async_trait;
use ferry_adapters::{AdapterError, JobState, JobStatus, TrainingService, TuningJobRequest};
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::PipelineRun;
use ferry_core::domain::stage::{Stage, StageResult};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::poll::poll_until;
use super::{StageContext, StageExecutor, bounded};

pub struct TrainExecutor {
    training: Arc<dyn TrainingService>,
}

impl TrainExecutor {
    pub fn new(training: Arc<dyn TrainingService>) -> Self {
        Self { training }
    }

    /// Submit a job, or pick up the one already on record
    async fn job_handle(
        &self,
        run: &PipelineRun,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> Result<String, RunError> {
        if let Some(handle) = run.pending_handle(Stage::Train) {
            info!(run_id = %run.run_id, job = %handle, "Resuming existing tuning job");
            return Ok(handle.to_string());
        }

        let request = TuningJobRequest {
            base_model: run.spec.base_model.clone(),
            dataset_uri: run.spec.dataset_uri.clone(),
            hyperparameters: run.spec.hyperparameters.clone(),
            display_name: run.spec.tuned_model_name.clone(),
        };
        let token = run.idempotency_token(Stage::Train);

        let handle = bounded(
            ctx,
            deadline,
            "tuning job submission",
            self.training.submit_tuning_job(&request, &token),
        )
        .await?
        .map_err(AdapterError::into_run_error)?;

        info!(run_id = %run.run_id, job = %handle, token = %token, "Tuning job submitted");
        ctx.checkpoint.record_pending(Stage::Train, &handle).await
    }

    async fn verdict(&self, handle: &str, status: JobStatus, ctx: &StageContext<'_>) -> StageResult {
        match status.state {
            JobState::Succeeded => match status.output_artifact_id {
                Some(artifact) => StageResult::success(artifact),
                None => StageResult::failure(RunError::new(
                    ErrorKind::BackendJobFailed,
                    format!("tuning job {} succeeded without a tuned model", handle),
                ))
                .with_partial_handle(handle),
            },
            JobState::Cancelled => StageResult::failure(RunError::new(
                ErrorKind::BackendJobFailed,
                format!("tuning job {} was cancelled outside the pipeline", handle),
            ))
            .with_partial_handle(handle),
            _ => {
                let error = status
                    .error
                    .map(|e| e.into_run_error())
                    .unwrap_or_else(|| {
                        RunError::new(
                            ErrorKind::BackendJobFailed,
                            format!("tuning job {} failed without an error", handle),
                        )
                    });

                if error.retriable {
                    // The dead job cannot be reused; the next attempt submits afresh
                    self.forget(handle, ctx).await;
                    StageResult::failure(error)
                } else {
                    StageResult::failure(error).with_partial_handle(handle)
                }
            }
        }
    }

    async fn forget(&self, handle: &str, ctx: &StageContext<'_>) {
        if let Err(e) = ctx.checkpoint.discard_pending(Stage::Train, handle).await {
            warn!(job = %handle, error = %e, "Failed to discard tuning job handle");
        }
    }
}

#[async_trait]
impl StageExecutor for TrainExecutor {
    fn stage(&self) -> Stage {
        Stage::Train
    }

    async fn execute(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> StageResult {
        if let Some(artifact) = &run.spec.source_artifact {
            info!(run_id = %run.run_id, artifact = %artifact, "Using existing artifact, skipping training");
            return StageResult::success(artifact.clone());
        }

        let deadline = ctx.deadline();
        let handle = match self.job_handle(run, ctx, deadline).await {
            Ok(handle) => handle,
            Err(e) => return StageResult::failure(e),
        };

        let status = poll_until(
            ctx,
            deadline,
            &handle,
            || self.training.get_job_status(&handle),
            |s: &JobStatus| s.state.is_terminal(),
        )
        .await;

        match status {
            Ok(status) => self.verdict(&handle, status, ctx).await,
            Err(e) if e.kind == ErrorKind::NotFound => {
                // Confirmed absent, so resubmitting cannot duplicate it
                self.forget(&handle, ctx).await;
                StageResult::failure(
                    RunError::new(
                        ErrorKind::Unavailable,
                        format!("tuning job {} no longer exists", handle),
                    )
                    .with_retriable(true),
                )
            }
            Err(e) => StageResult::failure(e),
        }
    }
}
