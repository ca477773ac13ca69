//! Ferry HTTP Client
//!
//! A type-safe HTTP client for the Ferry orchestrator API, shared by the CLI
//! and any tooling that launches or inspects promotion runs.
//!
//! # Example
//!
//! ```no_run
//! use ferry_client::OrchestratorClient;
//! use ferry_core::domain::spec::{Hyperparameters, PipelineSpec};
//! use ferry_core::dto::run::RunPipelineRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let run = client.launch_run(RunPipelineRequest {
//!         run_id: Some("flash-2024-06".to_string()),
//!         spec: PipelineSpec {
//!             base_model: "gemini-1.5-flash-002".to_string(),
//!             dataset_uri: "gs://bucket/train.jsonl".to_string(),
//!             hyperparameters: Hyperparameters::default(),
//!             tuned_model_name: None,
//!             dest_scope: "projects/target/locations/us-central1".to_string(),
//!             dest_name: "target-model".to_string(),
//!             source_artifact: None,
//!         },
//!     }).await?;
//!
//!     println!("Run {} is at {}", run.run_id, run.current_stage);
//!     Ok(())
//! }
//! ```

pub mod error;
mod runs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Ferry orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
