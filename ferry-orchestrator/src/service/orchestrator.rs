//! Pipeline Orchestrator
//!
//! Drives a run through Train, Promote, Deploy and Validate. Before each stage
//! the run is re-read from the Job State Store, so stages that already
//! committed are never executed again and a restarted process continues where
//! the last one stopped. Retry and abort decisions are made here and nowhere
//! else: executors only report what happened.
//!
//! Inside one process, calls for the same run are serialized by a per-run
//! mutex. Across processes the store's row lock, first-writer-wins pending
//! handles and idempotency tokens keep external resources from being created
//! twice.

use async_trait::async_trait;
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::{PipelineRun, RunId};
use ferry_core::domain::spec::PipelineSpec;
use ferry_core::domain::stage::{Stage, StageResult};
use ferry_core::dto::run::CancelResponse;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::repository::{JobStateStore, StoreError};
use crate::service::backoff::Backoff;
use crate::stage::{self, Adapters, Checkpoint, StageContext, StageExecutor};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("invalid pipeline spec: {0}")]
    InvalidSpec(RunError),

    #[error("run {0} already exists with a different spec")]
    SpecMismatch(RunId),

    #[error("{0}")]
    InvalidState(String),

    #[error("no executor registered for stage {0}")]
    MissingExecutor(Stage),

    #[error("endpoint release failed: {0}")]
    Teardown(RunError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(run_id) => OrchestratorError::NotFound(run_id),
            StoreError::Transition(e) => OrchestratorError::InvalidState(e.to_string()),
            other => OrchestratorError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub struct Orchestrator {
    store: Arc<dyn JobStateStore>,
    adapters: Adapters,
    executors: Vec<Arc<dyn StageExecutor>>,
    config: OrchestratorConfig,
    locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
    cancels: Mutex<HashMap<RunId, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStateStore>, adapters: Adapters, config: OrchestratorConfig) -> Self {
        let executors = stage::executors(&adapters);
        Self {
            store,
            adapters,
            executors,
            config,
            locks: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or pick up) a run and drive it to DONE or FAILED
    pub async fn run_pipeline(&self, run_id: RunId, spec: PipelineSpec) -> Result<PipelineRun> {
        self.start(&run_id, spec).await?;
        self.resume(&run_id).await
    }

    /// Load the run, creating it at TRAIN when it does not exist yet
    pub async fn start(&self, run_id: &RunId, spec: PipelineSpec) -> Result<PipelineRun> {
        spec.validate().map_err(OrchestratorError::InvalidSpec)?;

        let run = match self.store.get(run_id).await {
            Ok(run) => run,
            Err(StoreError::NotFound(_)) => match self.store.create(run_id, spec.clone()).await {
                Ok(run) => {
                    info!(run_id = %run_id, dest = %spec.dest_name, "Run created");
                    return Ok(run);
                }
                // Lost a creation race; the winner's record decides
                Err(StoreError::AlreadyExists(_)) => self.store.get(run_id).await?,
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        if run.spec != spec {
            return Err(OrchestratorError::SpecMismatch(run_id.clone()));
        }
        debug!(run_id = %run_id, stage = %run.current_stage, "Run already exists");
        Ok(run)
    }

    /// Drive an existing run from its current stage
    pub async fn resume(&self, run_id: &RunId) -> Result<PipelineRun> {
        let lock = self.run_lock(run_id).await;
        let result = {
            let _guard = lock.lock().await;
            let cancel = CancellationToken::new();
            self.cancels
                .lock()
                .await
                .insert(run_id.clone(), cancel.clone());

            let result = self.drive(run_id, &cancel).await;

            self.cancels.lock().await.remove(run_id);
            result
        };
        self.release_lock(run_id, lock).await;
        result
    }

    /// Drive a run in a background task
    pub fn spawn_resume(self: &Arc<Self>, run_id: RunId) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.resume(&run_id).await {
                Ok(run) => info!(run_id = %run_id, stage = %run.current_stage, "Run stopped"),
                Err(e) => error!(run_id = %run_id, error = %e, "Run could not be driven"),
            }
        });
    }

    /// Re-enter the failed stage of a FAILED run
    ///
    /// Only resets the record; callers drive it afterwards.
    pub async fn retry(&self, run_id: &RunId) -> Result<PipelineRun> {
        let run = self.store.reset_for_retry(run_id).await?;
        info!(run_id = %run_id, stage = %run.current_stage, "Run reset for retry");
        Ok(run)
    }

    /// Stop a run
    ///
    /// A run being driven is signalled and ends in FAILED once its stage
    /// observes the signal. An idle non-terminal run is failed directly.
    pub async fn cancel(&self, run_id: &RunId) -> Result<CancelResponse> {
        let run = self.store.get(run_id).await?;

        if let Some(token) = self.cancels.lock().await.get(run_id) {
            token.cancel();
            info!(run_id = %run_id, "Cancellation signalled");
            return Ok(CancelResponse {
                run_id: run_id.clone(),
                signalled: true,
                current_stage: run.current_stage,
            });
        }

        let Some(stage) = run.current_stage.as_stage() else {
            return Ok(CancelResponse {
                run_id: run_id.clone(),
                signalled: false,
                current_stage: run.current_stage,
            });
        };

        let run = self
            .store
            .mark_failed(run_id, stage, RunError::cancelled("run cancelled while idle"))
            .await?;
        info!(run_id = %run_id, stage = %stage, "Idle run cancelled");
        Ok(CancelResponse {
            run_id: run_id.clone(),
            signalled: false,
            current_stage: run.current_stage,
        })
    }

    /// Release the deployed endpoint of a finished run
    pub async fn teardown(&self, run_id: &RunId) -> Result<PipelineRun> {
        let run = self.store.get(run_id).await?;
        if !run.is_terminal() {
            return Err(OrchestratorError::InvalidState(format!(
                "run {} is still at {}; cancel it before tearing down",
                run_id, run.current_stage
            )));
        }
        if run.torn_down_at.is_some() {
            return Ok(run);
        }
        self.release_endpoint(&run).await
    }

    pub async fn get(&self, run_id: &RunId) -> Result<PipelineRun> {
        Ok(self.store.get(run_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<PipelineRun>> {
        Ok(self.store.list().await?)
    }

    /// Drive every unfinished run found in the store, e.g. after a restart
    pub async fn resume_incomplete(self: &Arc<Self>) -> Result<Vec<RunId>> {
        let pending: Vec<RunId> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|run| !run.is_terminal())
            .map(|run| run.run_id)
            .collect();

        for run_id in &pending {
            info!(run_id = %run_id, "Resuming unfinished run");
            self.spawn_resume(run_id.clone());
        }
        Ok(pending)
    }

    async fn drive(&self, run_id: &RunId, cancel: &CancellationToken) -> Result<PipelineRun> {
        loop {
            let run = self.store.get(run_id).await?;
            if run.is_terminal() {
                return Ok(run);
            }

            // Committed stages are reused, never executed again
            let Some(stage) = Stage::ALL.into_iter().find(|s| !run.has_succeeded(*s)) else {
                return Ok(run);
            };
            for done in Stage::ALL.into_iter().take_while(|s| *s != stage) {
                debug!(run_id = %run_id, stage = %done, "Stage already committed, skipping");
            }

            let run = self.execute_with_retry(run, stage, cancel).await?;
            if run.is_terminal() {
                return Ok(run);
            }
        }
    }

    async fn execute_with_retry(
        &self,
        mut run: PipelineRun,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let executor = self
            .executors
            .iter()
            .find(|e| e.stage() == stage)
            .ok_or(OrchestratorError::MissingExecutor(stage))?;
        let run_id = run.run_id.clone();
        let checkpoint = StoreCheckpoint {
            store: self.store.as_ref(),
            run_id: &run_id,
        };
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let ctx = StageContext {
                cancel: cancel.clone(),
                poll_interval: self.config.poll_interval,
                timeout: self.config.timeouts.for_stage(stage),
                validation_prompt: &self.config.validation_prompt,
                checkpoint: &checkpoint,
            };

            info!(run_id = %run_id, stage = %stage, attempt, "Executing stage");
            let result = executor.execute(&run, &ctx).await;

            if result.is_cancelled() {
                warn!(run_id = %run_id, stage = %stage, "Stage cancelled");
                let error = result
                    .error
                    .unwrap_or_else(|| RunError::cancelled("run cancelled"));
                return Ok(self.store.mark_failed(&run_id, stage, error).await?);
            }

            if result.succeeded || !result.retriable {
                return self.commit(&run_id, stage, result).await;
            }

            let error = result.error.unwrap_or_else(|| {
                RunError::new(ErrorKind::Unavailable, "retriable failure without an error")
            });
            if attempt > self.config.max_retries {
                error!(
                    run_id = %run_id,
                    stage = %stage,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Ok(self.store.mark_failed(&run_id, stage, error).await?);
            }

            let delay = backoff.next_delay();
            warn!(
                run_id = %run_id,
                stage = %stage,
                attempt,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retriable stage failure, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(run_id = %run_id, stage = %stage, "Cancelled during backoff");
                    return Ok(self
                        .store
                        .mark_failed(&run_id, stage, stage::cancelled())
                        .await?);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Pick up handles recorded or discarded by the failed attempt
            run = self.store.get(&run_id).await?;
            if run.is_terminal() || run.current_stage.as_stage() != Some(stage) {
                return Ok(run);
            }
        }
    }

    async fn commit(&self, run_id: &RunId, stage: Stage, result: StageResult) -> Result<PipelineRun> {
        let succeeded = result.succeeded;
        let run = self.store.commit_stage_result(run_id, stage, result).await?;

        if succeeded {
            info!(run_id = %run_id, stage = %stage, next = %run.current_stage, "Stage committed");
            return Ok(run);
        }

        if let Some(e) = &run.last_error {
            error!(run_id = %run_id, stage = %stage, kind = %e.kind, error = %e.message, "Stage failed");
        }
        if stage == Stage::Validate
            && run.failed_stage == Some(Stage::Validate)
            && self.config.teardown_on_validation_failure
        {
            return match self.release_endpoint(&run).await {
                Ok(run) => Ok(run),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Endpoint left running after failed validation");
                    Ok(run)
                }
            };
        }
        Ok(run)
    }

    async fn release_endpoint(&self, run: &PipelineRun) -> Result<PipelineRun> {
        let endpoint = run.succeeded_output(Stage::Deploy).ok_or_else(|| {
            OrchestratorError::InvalidState(format!("run {} has no deployed endpoint", run.run_id))
        })?;

        self.adapters
            .deployment
            .undeploy(endpoint)
            .await
            .map_err(|e| OrchestratorError::Teardown(e.into_run_error()))?;
        info!(run_id = %run.run_id, endpoint = %endpoint, "Endpoint released");

        Ok(self.store.mark_torn_down(&run.run_id).await?)
    }

    async fn run_lock(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(run_id.clone()).or_default())
    }

    async fn release_lock(&self, run_id: &RunId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(run_id);
        }
    }
}

/// Checkpoint writes go straight to the store
struct StoreCheckpoint<'a> {
    store: &'a dyn JobStateStore,
    run_id: &'a RunId,
}

#[async_trait]
impl Checkpoint for StoreCheckpoint<'_> {
    async fn record_pending(&self, stage: Stage, handle: &str) -> std::result::Result<String, RunError> {
        let run = self
            .store
            .record_pending(self.run_id, stage, handle)
            .await
            .map_err(checkpoint_error)?;
        run.pending_handle(stage).map(str::to_string).ok_or_else(|| {
            RunError::new(
                ErrorKind::Internal,
                format!("pending {} handle vanished after recording", stage),
            )
        })
    }

    async fn discard_pending(&self, stage: Stage, handle: &str) -> std::result::Result<String, RunError> {
        let run = self
            .store
            .discard_pending(self.run_id, stage, handle)
            .await
            .map_err(checkpoint_error)?;
        Ok(run.idempotency_token(stage))
    }
}

fn checkpoint_error(err: StoreError) -> RunError {
    match err {
        StoreError::Database(_) => RunError::new(
            ErrorKind::Unavailable,
            format!("job state store unavailable: {}", err),
        ),
        other => RunError::new(ErrorKind::Internal, other.to_string()),
    }
}
