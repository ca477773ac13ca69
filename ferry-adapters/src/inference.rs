//! Inference Service adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::HttpTransport;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub text: String,
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn invoke(&self, endpoint_id: &str, prompt: &str) -> Result<InferenceResponse>;
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
}

/// Inference Service over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpInferenceService {
    http: HttpTransport,
}

impl HttpInferenceService {
    pub fn new(http: HttpTransport) -> Self {
        Self { http }
    }
}

#[async_trait]
impl InferenceService for HttpInferenceService {
    async fn invoke(&self, endpoint_id: &str, prompt: &str) -> Result<InferenceResponse> {
        let method = format!("{}:generateContent", endpoint_id);
        let url = self.http.url(&["endpoints", &method])?;
        self.http
            .send_json(self.http.post(url).json(&GenerateBody { prompt }))
            .await
    }
}
