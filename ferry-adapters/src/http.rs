//! Shared HTTP plumbing for the adapters
//!
//! Builds URLs from encoded path segments, attaches credentials and
//! idempotency keys, and turns responses into typed values or classified errors.

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{AdapterError, Result};
use ferry_core::domain::error::ErrorKind;

/// Header carrying the idempotency token of create calls
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct NamedResource {
    #[serde(default)]
    name: String,
}

/// HTTP transport for one external service
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    client: Client,
    access_token: Option<String>,
}

impl HttpTransport {
    /// Create a transport for the service rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    /// Create a transport with a custom HTTP client (timeouts, proxies, TLS)
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AdapterError::new(
                ErrorKind::InvalidArgument,
                format!("invalid base URL '{}': {}", base_url, e),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AdapterError::new(
                ErrorKind::InvalidArgument,
                format!("base URL '{}' cannot carry a path", base_url),
            ));
        }

        Ok(Self {
            base_url,
            client,
            access_token: None,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended by `segments`, each percent-encoded as one segment
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AdapterError::new(ErrorKind::Internal, "base URL cannot carry a path")
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub fn post(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    pub fn delete(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.delete(url))
    }

    /// POST with an idempotency token
    pub fn create(&self, url: Url, token: &str) -> RequestBuilder {
        self.post(url).header(IDEMPOTENCY_HEADER, token)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures only
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        Ok(builder.send().await?)
    }

    /// Send a request and deserialize a successful JSON response
    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        decode(response).await
    }

    /// Send a create call and return the name of the resource it refers to
    ///
    /// A 409 whose body names a resource means the idempotency token already
    /// created it; that resource is returned as if freshly created.
    pub async fn send_create(&self, builder: RequestBuilder) -> Result<String> {
        let response = self.send(builder).await?;
        if response.status() != StatusCode::CONFLICT {
            let created: NamedResource = decode(response).await?;
            return Ok(created.name);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<NamedResource>(&body) {
            Ok(existing) if !existing.name.is_empty() => {
                tracing::debug!(name = %existing.name, "Resource already exists, reusing it");
                Ok(existing.name)
            }
            _ => Err(AdapterError::from_status(StatusCode::CONFLICT.as_u16(), &body)),
        }
    }

    /// Send a request that returns no meaningful body
    pub async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        let response = self.send(builder).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

/// Check the status code and deserialize the body of a response
pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response.json().await.map_err(|e| {
        AdapterError::new(
            ErrorKind::Internal,
            format!("Failed to parse JSON response: {}", e),
        )
    })
}

/// Classified error for a non-success response
pub async fn error_from_response(response: Response) -> AdapterError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    AdapterError::from_status(status, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_segments() {
        let transport = HttpTransport::new("http://localhost:9000").unwrap();
        let url = transport.url(&["tuningJobs", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/tuningJobs/a%2Fb%20c");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let transport = HttpTransport::new("http://localhost:9000/v1/").unwrap();
        let url = transport.url(&["artifacts:copy"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/v1/artifacts:copy");
    }

    #[tokio::test]
    async fn test_create_conflict_naming_resource_reuses_it() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/things")
            .with_status(409)
            .with_body(r#"{"name": "things/T1", "error": {"message": "already exists"}}"#)
            .create_async()
            .await;
        let transport = HttpTransport::new(&server.url()).unwrap();

        let url = transport.url(&["things"]).unwrap();
        let name = transport
            .send_create(transport.create(url, "run-1.train.0"))
            .await
            .unwrap();

        assert_eq!(name, "things/T1");
    }

    #[tokio::test]
    async fn test_create_conflict_without_name_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/things")
            .with_status(409)
            .with_body(r#"{"error": {"message": "name taken by another caller"}}"#)
            .create_async()
            .await;
        let transport = HttpTransport::new(&server.url()).unwrap();

        let url = transport.url(&["things"]).unwrap();
        let err = transport
            .send_create(transport.create(url, "run-1.train.0"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(err.message, "name taken by another caller");
    }

    #[test]
    fn test_rejects_invalid_base() {
        let err = HttpTransport::new("not a url").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let err = HttpTransport::new("mailto:ops@example.com").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
