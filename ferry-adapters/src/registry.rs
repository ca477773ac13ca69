//! Artifact Registry adapter
//!
//! Copies a model artifact from its origin scope into a destination scope.
//! A name collision is not an error at this layer: it comes back as
//! [`CopyOutcome::AlreadyExists`] so the caller can compare lineage.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};
use crate::http::{self, HttpTransport};

/// Cross-scope copy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyArtifactRequest {
    pub source_id: String,
    pub dest_scope: String,
    pub dest_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(String),
    AlreadyExists {
        existing_id: String,
        /// Lineage of the existing artifact when the registry reports it
        source_id: Option<String>,
    },
}

/// Registry view of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub artifact_id: String,
    pub source_artifact_id: Option<String>,
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn copy_artifact(
        &self,
        request: &CopyArtifactRequest,
        idempotency_token: &str,
    ) -> Result<CopyOutcome>;

    async fn get_artifact(&self, artifact_id: &str) -> Result<ArtifactInfo>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CopyBody<'a> {
    source_artifact: &'a str,
    destination_scope: &'a str,
    destination_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactBody {
    name: String,
    #[serde(default)]
    source_artifact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    existing: String,
    #[serde(default)]
    source_artifact: Option<String>,
}

/// Artifact Registry over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpArtifactRegistry {
    http: HttpTransport,
}

impl HttpArtifactRegistry {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ArtifactRegistry for HttpArtifactRegistry {
    async fn copy_artifact(
        &self,
        request: &CopyArtifactRequest,
        idempotency_token: &str,
    ) -> Result<CopyOutcome> {
        let body = CopyBody {
            source_artifact: &request.source_id,
            destination_scope: &request.dest_scope,
            destination_name: &request.dest_name,
        };

        let url = self.http.url(&["artifacts:copy"])?;
        let response = self
            .http
            .send(self.http.create(url, idempotency_token).json(&body))
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let text = response.text().await.map_err(AdapterError::from)?;
            // A 409 without an `existing` id is an ordinary conflict error
            return match serde_json::from_str::<ConflictBody>(&text) {
                Ok(conflict) => Ok(CopyOutcome::AlreadyExists {
                    existing_id: conflict.existing,
                    source_id: conflict.source_artifact,
                }),
                Err(_) => Err(AdapterError::from_status(409, &text)),
            };
        }

        let artifact: ArtifactBody = http::decode(response).await?;
        Ok(CopyOutcome::Copied(artifact.name))
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<ArtifactInfo> {
        let url = self.http.url(&["artifacts", artifact_id])?;
        let artifact: ArtifactBody = self.http.send_json(self.http.get(url)).await?;

        Ok(ArtifactInfo {
            artifact_id: artifact.name,
            source_artifact_id: artifact.source_artifact,
        })
    }
}
