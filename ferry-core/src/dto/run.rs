//! Run DTOs for the orchestrator API

use serde::{Deserialize, Serialize};

use crate::domain::error::RunError;
use crate::domain::run::{PipelineRun, RunId, RunStage};
use crate::domain::spec::PipelineSpec;
use crate::domain::stage::Stage;

/// Request to start (or resume) a promotion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPipelineRequest {
    /// Idempotency key of the run; generated when omitted
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(flatten)]
    pub spec: PipelineSpec,
}

/// Compact view of a run for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub current_stage: RunStage,
    pub failed_stage: Option<Stage>,
    pub last_error: Option<RunError>,
    pub dest_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            current_stage: run.current_stage,
            failed_stage: run.failed_stage,
            last_error: run.last_error.clone(),
            dest_name: run.spec.dest_name.clone(),
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

/// Reply to a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub run_id: RunId,
    /// The run was being driven and its cancellation signal fired
    pub signalled: bool,
    pub current_stage: RunStage,
}
