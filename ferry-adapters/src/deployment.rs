//! Deployment Service adapter
//!
//! Provisioning an endpoint is a long-running operation: `deploy` returns an
//! operation handle that is polled with `get_deploy_status`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};
use crate::http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeployState::Succeeded | DeployState::Failed)
    }

    pub fn from_wire(state: &str) -> Self {
        match state {
            "SUCCEEDED" | "DONE" => DeployState::Succeeded,
            "FAILED" | "CANCELLED" => DeployState::Failed,
            "PENDING" | "QUEUED" => DeployState::Pending,
            _ => DeployState::Running,
        }
    }
}

/// Snapshot of a deploy operation
#[derive(Debug, Clone, PartialEq)]
pub struct DeployStatus {
    pub state: DeployState,
    /// Endpoint allocated so far; may be present on a failed operation
    pub endpoint_id: Option<String>,
    pub error: Option<BackendError>,
}

#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Start provisioning an endpoint for `artifact_id`, returning the operation handle
    async fn deploy(&self, artifact_id: &str, idempotency_token: &str) -> Result<String>;

    async fn get_deploy_status(&self, handle: &str) -> Result<DeployStatus>;

    /// Release an endpoint; releasing one that is already gone succeeds
    async fn undeploy(&self, endpoint_id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct DeployBody<'a> {
    artifact: &'a str,
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    #[serde(default)]
    state: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    error: Option<BackendError>,
}

/// Deployment Service over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpDeploymentService {
    http: HttpTransport,
}

impl HttpDeploymentService {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DeploymentService for HttpDeploymentService {
    async fn deploy(&self, artifact_id: &str, idempotency_token: &str) -> Result<String> {
        let url = self.http.url(&["endpoints:deploy"])?;
        let body = DeployBody {
            artifact: artifact_id,
        };
        let operation = self
            .http
            .send_create(self.http.create(url, idempotency_token).json(&body))
            .await?;

        tracing::debug!(operation = %operation, artifact = %artifact_id, "Deploy started");
        Ok(operation)
    }

    async fn get_deploy_status(&self, handle: &str) -> Result<DeployStatus> {
        let url = self.http.url(&["operations", handle])?;
        let operation: OperationBody = self.http.send_json(self.http.get(url)).await?;

        Ok(DeployStatus {
            state: DeployState::from_wire(&operation.state),
            endpoint_id: operation.endpoint.filter(|e| !e.is_empty()),
            error: operation.error,
        })
    }

    async fn undeploy(&self, endpoint_id: &str) -> Result<()> {
        let url = self.http.url(&["endpoints", endpoint_id])?;
        match self.http.send_empty(self.http.delete(url)).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(endpoint = %endpoint_id, "Endpoint already gone");
                Ok(())
            }
            other => other,
        }
    }
}
