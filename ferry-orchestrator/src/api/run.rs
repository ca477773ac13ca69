//! Run API Handlers
//!
//! HTTP endpoints for starting, inspecting and controlling pipeline runs.
//! Driving a run can take hours, so `POST /runs` and retry answer right away
//! and the run continues in a background task.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ferry_core::domain::run::{PipelineRun, RunId};
use ferry_core::dto::run::{CancelResponse, RunPipelineRequest, RunSummary};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::service::Orchestrator;

fn parse_run_id(raw: String) -> ApiResult<RunId> {
    RunId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// POST /runs
/// Create (or pick up) a run and drive it in the background
pub async fn start_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<RunPipelineRequest>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    let run_id = match req.run_id {
        Some(raw) => parse_run_id(raw)?,
        None => RunId::generate(),
    };
    tracing::info!("Starting run {} for {}", run_id, req.spec.dest_name);

    let run = orchestrator.start(&run_id, req.spec).await?;
    if !run.is_terminal() {
        orchestrator.spawn_resume(run_id);
    }

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /runs
pub async fn list_runs(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs");

    let runs = orchestrator.list().await?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /runs/{run_id}
pub async fn get_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<PipelineRun>> {
    let run_id = parse_run_id(run_id)?;
    tracing::debug!("Getting run: {}", run_id);

    Ok(Json(orchestrator.get(&run_id).await?))
}

/// POST /runs/{run_id}/cancel
pub async fn cancel_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let run_id = parse_run_id(run_id)?;
    tracing::info!("Cancelling run: {}", run_id);

    Ok(Json(orchestrator.cancel(&run_id).await?))
}

/// POST /runs/{run_id}/retry
/// Re-enter the failed stage and drive the run in the background
pub async fn retry_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    let run_id = parse_run_id(run_id)?;
    tracing::info!("Retrying run: {}", run_id);

    let run = orchestrator.retry(&run_id).await?;
    orchestrator.spawn_resume(run_id);

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// POST /runs/{run_id}/teardown
/// Release the endpoint of a finished run
pub async fn teardown_run(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<PipelineRun>> {
    let run_id = parse_run_id(run_id)?;
    tracing::info!("Tearing down run: {}", run_id);

    Ok(Json(orchestrator.teardown(&run_id).await?))
}
