//! Run-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use ferry_core::domain::run::PipelineRun;
use ferry_core::dto::run::{CancelResponse, RunPipelineRequest, RunSummary};

impl OrchestratorClient {
    /// Start a run, or pick up the existing run with the same id
    ///
    /// Returns as soon as the orchestrator has accepted the run; poll
    /// [`get_run`](Self::get_run) to follow it.
    pub async fn launch_run(&self, req: RunPipelineRequest) -> Result<PipelineRun> {
        let url = format!("{}/runs", self.base_url);
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// List all runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the full record of a run
    pub async fn get_run(&self, run_id: &str) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<CancelResponse> {
        let url = format!("{}/runs/{}/cancel", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Re-enter the failed stage of a FAILED run
    pub async fn retry_run(&self, run_id: &str) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}/retry", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Release the endpoint of a finished run
    pub async fn teardown_run(&self, run_id: &str) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}/teardown", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
