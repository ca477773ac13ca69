//! API Module
//!
//! HTTP API layer for the orchestrator.

pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::Orchestrator;

/// Create the main API router with all endpoints
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/runs", post(run::start_run).get(run::list_runs))
        .route("/runs/{run_id}", get(run::get_run))
        .route("/runs/{run_id}/cancel", post(run::cancel_run))
        .route("/runs/{run_id}/retry", post(run::retry_run))
        .route("/runs/{run_id}/teardown", post(run::teardown_run))
        // Add state and middleware
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}
