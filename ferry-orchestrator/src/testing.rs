//! Scripted fakes for executor and orchestrator tests
//!
//! Each fake answers from a script of canned responses; the last response
//! repeats once the script runs out. Create verbs deduplicate on the
//! idempotency token the way a well-behaved backend does, and every call is
//! counted so tests can assert on what reached the "network".

use async_trait::async_trait;
use ferry_adapters::{
    AdapterError, ArtifactInfo, ArtifactRegistry, BackendError, CopyArtifactRequest, CopyOutcome,
    DeployState, DeployStatus, DeploymentService, InferenceResponse, InferenceService, JobState,
    JobStatus, TrainingService, TuningJobRequest,
};
use ferry_core::domain::error::RunError;
use ferry_core::domain::spec::{Hyperparameters, PipelineSpec};
use ferry_core::domain::stage::Stage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::stage::{Adapters, Checkpoint, StageContext};

pub struct Script<T> {
    steps: Mutex<VecDeque<T>>,
    last: Mutex<Option<T>>,
}

impl<T: Clone> Script<T> {
    pub fn new(steps: Vec<T>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
        }
    }

    pub fn push(&self, step: T) {
        self.steps.lock().unwrap().push_back(step);
    }

    fn next(&self) -> Option<T> {
        let mut last = self.last.lock().unwrap();
        if let Some(step) = self.steps.lock().unwrap().pop_front() {
            *last = Some(step.clone());
        }
        last.clone()
    }
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Token-deduplicating create verb
#[derive(Default)]
struct Creates {
    calls: AtomicU32,
    by_token: Mutex<HashMap<String, String>>,
    tokens: Mutex<Vec<String>>,
}

impl Creates {
    /// Counts a call that reached the service, whether or not it creates anything
    fn called(&self, token: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());
    }

    fn create(&self, prefix: &str, token: &str) -> String {
        let mut by_token = self.by_token.lock().unwrap();
        let next = by_token.len() + 1;
        by_token
            .entry(token.to_string())
            .or_insert_with(|| format!("{}{}", prefix, next))
            .clone()
    }

    fn created(&self) -> usize {
        self.by_token.lock().unwrap().len()
    }
}

// =============================================================================
// Training
// =============================================================================

#[derive(Default)]
pub struct FakeTraining {
    creates: Creates,
    pub submit_errors: Script<Option<AdapterError>>,
    pub statuses: Script<Result<JobStatus, AdapterError>>,
    pub status_calls: AtomicU32,
    /// Delay before a submission is answered, to widen race windows
    pub submit_delay: Mutex<Duration>,
}

impl FakeTraining {
    pub fn with_statuses(statuses: Vec<Result<JobStatus, AdapterError>>) -> Self {
        Self {
            statuses: Script::new(statuses),
            ..Self::default()
        }
    }

    /// Submit calls that reached the service
    pub fn submit_calls(&self) -> u32 {
        self.creates.calls.load(Ordering::SeqCst)
    }

    /// Distinct jobs the service started
    pub fn jobs_created(&self) -> usize {
        self.creates.created()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.creates.tokens.lock().unwrap().clone()
    }
}

pub fn job(state: JobState) -> Result<JobStatus, AdapterError> {
    Ok(JobStatus {
        state,
        output_artifact_id: None,
        error: None,
    })
}

pub fn job_succeeded(artifact: &str) -> Result<JobStatus, AdapterError> {
    Ok(JobStatus {
        state: JobState::Succeeded,
        output_artifact_id: Some(artifact.to_string()),
        error: None,
    })
}

pub fn job_failed(code: i32, message: &str) -> Result<JobStatus, AdapterError> {
    Ok(JobStatus {
        state: JobState::Failed,
        output_artifact_id: None,
        error: Some(BackendError {
            code: Some(code),
            message: message.to_string(),
        }),
    })
}

#[async_trait]
impl TrainingService for FakeTraining {
    async fn submit_tuning_job(
        &self,
        _request: &TuningJobRequest,
        idempotency_token: &str,
    ) -> ferry_adapters::Result<String> {
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.creates.called(idempotency_token);
        if let Some(Some(err)) = self.submit_errors.next() {
            return Err(err);
        }
        Ok(self.creates.create("tuningJobs/J", idempotency_token))
    }

    async fn get_job_status(&self, _job_handle: &str) -> ferry_adapters::Result<JobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .next()
            .unwrap_or_else(|| job_succeeded("art-1"))
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct FakeRegistry {
    pub outcomes: Script<Result<CopyOutcome, AdapterError>>,
    pub copy_calls: AtomicU32,
    pub artifacts: Mutex<HashMap<String, ArtifactInfo>>,
    pub requests: Mutex<Vec<CopyArtifactRequest>>,
}

impl FakeRegistry {
    pub fn with_outcomes(outcomes: Vec<Result<CopyOutcome, AdapterError>>) -> Self {
        Self {
            outcomes: Script::new(outcomes),
            ..Self::default()
        }
    }

    pub fn copy_calls(&self) -> u32 {
        self.copy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactRegistry for FakeRegistry {
    async fn copy_artifact(
        &self,
        request: &CopyArtifactRequest,
        _idempotency_token: &str,
    ) -> ferry_adapters::Result<CopyOutcome> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .next()
            .unwrap_or_else(|| Ok(CopyOutcome::Copied("dst-1".to_string())))
    }

    async fn get_artifact(&self, artifact_id: &str) -> ferry_adapters::Result<ArtifactInfo> {
        self.artifacts
            .lock()
            .unwrap()
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| {
                AdapterError::new(
                    ferry_adapters::ErrorKind::NotFound,
                    format!("artifact {} not found", artifact_id),
                )
            })
    }
}

// =============================================================================
// Deployment
// =============================================================================

#[derive(Default)]
pub struct FakeDeployment {
    creates: Creates,
    pub statuses: Script<Result<DeployStatus, AdapterError>>,
    pub status_calls: AtomicU32,
    pub undeployed: Mutex<Vec<String>>,
}

impl FakeDeployment {
    pub fn with_statuses(statuses: Vec<Result<DeployStatus, AdapterError>>) -> Self {
        Self {
            statuses: Script::new(statuses),
            ..Self::default()
        }
    }

    pub fn deploy_calls(&self) -> u32 {
        self.creates.calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.creates.tokens.lock().unwrap().clone()
    }

    pub fn undeployed(&self) -> Vec<String> {
        self.undeployed.lock().unwrap().clone()
    }
}

pub fn deploy(state: DeployState, endpoint: Option<&str>) -> Result<DeployStatus, AdapterError> {
    Ok(DeployStatus {
        state,
        endpoint_id: endpoint.map(str::to_string),
        error: None,
    })
}

pub fn deploy_failed(endpoint: Option<&str>, code: i32, message: &str) -> Result<DeployStatus, AdapterError> {
    Ok(DeployStatus {
        state: DeployState::Failed,
        endpoint_id: endpoint.map(str::to_string),
        error: Some(BackendError {
            code: Some(code),
            message: message.to_string(),
        }),
    })
}

#[async_trait]
impl DeploymentService for FakeDeployment {
    async fn deploy(&self, _artifact_id: &str, idempotency_token: &str) -> ferry_adapters::Result<String> {
        self.creates.called(idempotency_token);
        Ok(self.creates.create("operations/op-", idempotency_token))
    }

    async fn get_deploy_status(&self, _handle: &str) -> ferry_adapters::Result<DeployStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .next()
            .unwrap_or_else(|| deploy(DeployState::Succeeded, Some("ep-1")))
    }

    async fn undeploy(&self, endpoint_id: &str) -> ferry_adapters::Result<()> {
        self.undeployed.lock().unwrap().push(endpoint_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Inference
// =============================================================================

#[derive(Default)]
pub struct FakeInference {
    pub responses: Script<Result<InferenceResponse, AdapterError>>,
    pub calls: AtomicU32,
}

impl FakeInference {
    pub fn with_responses(responses: Vec<Result<InferenceResponse, AdapterError>>) -> Self {
        Self {
            responses: Script::new(responses),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn reply(text: &str) -> Result<InferenceResponse, AdapterError> {
    Ok(InferenceResponse {
        text: text.to_string(),
    })
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn invoke(&self, _endpoint_id: &str, _prompt: &str) -> ferry_adapters::Result<InferenceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .next()
            .unwrap_or_else(|| reply("Hello from the tuned model"))
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// All four fakes, kept alongside the `Adapters` handed to the code under test
#[derive(Clone)]
pub struct Fakes {
    pub training: Arc<FakeTraining>,
    pub registry: Arc<FakeRegistry>,
    pub deployment: Arc<FakeDeployment>,
    pub inference: Arc<FakeInference>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            training: Arc::new(FakeTraining::default()),
            registry: Arc::new(FakeRegistry::default()),
            deployment: Arc::new(FakeDeployment::default()),
            inference: Arc::new(FakeInference::default()),
        }
    }
}

impl Fakes {
    pub fn adapters(&self) -> Adapters {
        Adapters {
            training: self.training.clone(),
            registry: self.registry.clone(),
            deployment: self.deployment.clone(),
            inference: self.inference.clone(),
        }
    }
}

pub fn spec() -> PipelineSpec {
    PipelineSpec {
        base_model: "gemini-1.5-flash-002".to_string(),
        dataset_uri: "gs://tuning-bucket/train_data.jsonl".to_string(),
        hyperparameters: Hyperparameters::default(),
        tuned_model_name: Some("tuned-flash".to_string()),
        dest_scope: "projects/target/locations/us-central1".to_string(),
        dest_name: "target-model".to_string(),
        source_artifact: None,
    }
}

/// Checkpoint that remembers what it was asked to do
#[derive(Default)]
pub struct RecordingCheckpoint {
    pub recorded: Mutex<Vec<(Stage, String)>>,
    pub discarded: Mutex<Vec<(Stage, String)>>,
    /// Handle returned by `record_pending` instead of the caller's
    pub winner: Option<String>,
}

/// Token handed out after a discard
pub const NEXT_TOKEN: &str = "run-1.next";

#[async_trait]
impl Checkpoint for RecordingCheckpoint {
    async fn record_pending(&self, stage: Stage, handle: &str) -> Result<String, RunError> {
        self.recorded
            .lock()
            .unwrap()
            .push((stage, handle.to_string()));
        Ok(self.winner.clone().unwrap_or_else(|| handle.to_string()))
    }

    async fn discard_pending(&self, stage: Stage, handle: &str) -> Result<String, RunError> {
        self.discarded
            .lock()
            .unwrap()
            .push((stage, handle.to_string()));
        Ok(NEXT_TOKEN.to_string())
    }
}

pub fn context(checkpoint: &RecordingCheckpoint, timeout_ms: u64) -> StageContext<'_> {
    StageContext {
        cancel: CancellationToken::new(),
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_millis(timeout_ms),
        validation_prompt: "Say hello",
        checkpoint,
    }
}
