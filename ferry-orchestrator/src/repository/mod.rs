//! Job State Store
//!
//! Durable owner of [`PipelineRun`] records. Every mutation goes through
//! [`JobStateStore::update`], which applies a [`RunUpdate`] atomically with
//! respect to other writers of the same run. The transition rules themselves
//! live on `PipelineRun`, so the in-memory and PostgreSQL stores behave alike.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::domain::error::RunError;
use ferry_core::domain::run::{PipelineRun, RunId, TransitionError};
use ferry_core::domain::spec::PipelineSpec;
use ferry_core::domain::stage::{Stage, StageResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("run {0} already exists")]
    AlreadyExists(RunId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("stored run {run_id} is unreadable: {reason}")]
    Corrupt { run_id: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One atomic change to a run record
#[derive(Debug, Clone)]
pub enum RunUpdate {
    /// Record a stage outcome; the first terminal result for a stage wins
    CommitStage { stage: Stage, result: StageResult },
    /// End the run in FAILED without a stage output
    Fail { stage: Stage, error: RunError },
    RecordPending { stage: Stage, handle: String },
    DiscardPending { stage: Stage, handle: String },
    ResetForRetry,
    MarkTornDown,
}

impl RunUpdate {
    /// Applies the update, returning whether the record changed
    pub fn apply(
        self,
        run: &mut PipelineRun,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, TransitionError> {
        match self {
            RunUpdate::CommitStage { stage, result } => run.apply_stage_result(stage, &result, now),
            RunUpdate::Fail { stage, error } => run.fail(stage, error, now),
            RunUpdate::RecordPending { stage, handle } => run.record_pending(stage, &handle, now),
            RunUpdate::DiscardPending { stage, handle } => {
                Ok(run.discard_pending(stage, &handle, now))
            }
            RunUpdate::ResetForRetry => run.reset_for_retry(now).map(|_| true),
            RunUpdate::MarkTornDown => run.mark_torn_down(now).map(|_| true),
        }
    }
}

#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Persist a fresh run at TRAIN; fails with `AlreadyExists` on a taken id
    async fn create(&self, run_id: &RunId, spec: PipelineSpec) -> Result<PipelineRun>;

    async fn get(&self, run_id: &RunId) -> Result<PipelineRun>;

    /// All runs, newest first
    async fn list(&self) -> Result<Vec<PipelineRun>>;

    /// Apply `update` to the run under the store's per-run serialization
    ///
    /// Returns the record as stored afterwards, whether or not it changed.
    async fn update(&self, run_id: &RunId, update: RunUpdate) -> Result<PipelineRun>;

    async fn commit_stage_result(
        &self,
        run_id: &RunId,
        stage: Stage,
        result: StageResult,
    ) -> Result<PipelineRun> {
        self.update(run_id, RunUpdate::CommitStage { stage, result })
            .await
    }

    async fn mark_failed(&self, run_id: &RunId, stage: Stage, error: RunError) -> Result<PipelineRun> {
        self.update(run_id, RunUpdate::Fail { stage, error }).await
    }

    async fn record_pending(&self, run_id: &RunId, stage: Stage, handle: &str) -> Result<PipelineRun> {
        self.update(
            run_id,
            RunUpdate::RecordPending {
                stage,
                handle: handle.to_string(),
            },
        )
        .await
    }

    async fn discard_pending(&self, run_id: &RunId, stage: Stage, handle: &str) -> Result<PipelineRun> {
        self.update(
            run_id,
            RunUpdate::DiscardPending {
                stage,
                handle: handle.to_string(),
            },
        )
        .await
    }

    async fn reset_for_retry(&self, run_id: &RunId) -> Result<PipelineRun> {
        self.update(run_id, RunUpdate::ResetForRetry).await
    }

    async fn mark_torn_down(&self, run_id: &RunId) -> Result<PipelineRun> {
        self.update(run_id, RunUpdate::MarkTornDown).await
    }
}
