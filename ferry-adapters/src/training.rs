//! Training Service adapter
//!
//! Submits tuning jobs and reports their status. Submission is asynchronous:
//! the service returns a job handle immediately and the caller polls it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};
use crate::http::HttpTransport;
use ferry_core::domain::spec::Hyperparameters;

/// Fine-tuning request sent to the Training Service
#[derive(Debug, Clone, PartialEq)]
pub struct TuningJobRequest {
    pub base_model: String,
    pub dataset_uri: String,
    pub hyperparameters: Hyperparameters,
    pub display_name: Option<String>,
}

/// Lifecycle state of a tuning job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Map the service's `JOB_STATE_*` strings
    ///
    /// Unknown states are treated as still running so a new backend state
    /// never ends a stage early.
    pub fn from_wire(state: &str) -> Self {
        match state {
            "JOB_STATE_SUCCEEDED" => JobState::Succeeded,
            "JOB_STATE_FAILED" | "JOB_STATE_EXPIRED" => JobState::Failed,
            "JOB_STATE_CANCELLED" => JobState::Cancelled,
            "JOB_STATE_QUEUED" | "JOB_STATE_PENDING" | "JOB_STATE_UNSPECIFIED" => {
                JobState::Pending
            }
            _ => JobState::Running,
        }
    }
}

/// Snapshot of a tuning job
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    /// Identifier of the tuned model, present once the job succeeded
    pub output_artifact_id: Option<String>,
    pub error: Option<BackendError>,
}

#[async_trait]
pub trait TrainingService: Send + Sync {
    /// Submit a tuning job and return its handle
    ///
    /// Submitting twice with the same token returns the existing job's handle.
    async fn submit_tuning_job(
        &self,
        request: &TuningJobRequest,
        idempotency_token: &str,
    ) -> Result<String>;

    async fn get_job_status(&self, job_handle: &str) -> Result<JobStatus>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    base_model: &'a str,
    training_dataset_uri: &'a str,
    hyper_parameters: HyperParametersBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    tuned_model_display_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HyperParametersBody {
    epoch_count: u32,
    learning_rate_multiplier: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    #[serde(default)]
    state: String,
    #[serde(default)]
    tuned_model: Option<TunedModelBody>,
    #[serde(default)]
    error: Option<BackendError>,
}

#[derive(Debug, Deserialize)]
struct TunedModelBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Training Service over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpTrainingService {
    http: HttpTransport,
}

impl HttpTrainingService {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TrainingService for HttpTrainingService {
    async fn submit_tuning_job(
        &self,
        request: &TuningJobRequest,
        idempotency_token: &str,
    ) -> Result<String> {
        let body = SubmitBody {
            base_model: &request.base_model,
            training_dataset_uri: &request.dataset_uri,
            hyper_parameters: HyperParametersBody {
                epoch_count: request.hyperparameters.epoch_count,
                learning_rate_multiplier: request.hyperparameters.learning_rate_multiplier,
            },
            tuned_model_display_name: request.display_name.as_deref(),
        };

        let url = self.http.url(&["tuningJobs"])?;
        let job = self
            .http
            .send_create(self.http.create(url, idempotency_token).json(&body))
            .await?;

        tracing::debug!(job = %job, "Tuning job submitted");
        Ok(job)
    }

    async fn get_job_status(&self, job_handle: &str) -> Result<JobStatus> {
        let url = self.http.url(&["tuningJobs", job_handle])?;
        let job: JobBody = self.http.send_json(self.http.get(url)).await?;

        // Prefer the served endpoint: it is what gets invoked and promoted
        let output_artifact_id = job
            .tuned_model
            .and_then(|m| m.endpoint.or(m.model))
            .filter(|id| !id.is_empty());

        Ok(JobStatus {
            state: JobState::from_wire(&job.state),
            output_artifact_id,
            error: job.error,
        })
    }
}
