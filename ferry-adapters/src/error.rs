//! Error types for the stage client adapters

use ferry_core::domain::error::{ErrorKind, RunError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Classified failure of a call to an external service
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status code, when the failure came from a response
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Create an error from a non-success status code and its response body
    pub fn from_status(status: u16, body: &str) -> Self {
        Self {
            kind: classify_status(status),
            message: extract_message(body),
            status: Some(status),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Structured error for a stage result, keeping the adapter's classification
    pub fn into_run_error(self) -> RunError {
        RunError::new(self.kind, self.message)
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ErrorKind::Unavailable
        } else if err.is_decode() {
            ErrorKind::Internal
        } else if let Some(status) = err.status() {
            classify_status(status.as_u16())
        } else {
            ErrorKind::Unavailable
        };
        Self {
            kind,
            message: format!("HTTP request failed: {}", err),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Map an HTTP status code onto the error taxonomy
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::InvalidArgument,
        401 | 403 => ErrorKind::Unauthenticated,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Unavailable,
        409 => ErrorKind::AlreadyExists,
        429 => ErrorKind::QuotaExceeded,
        500..=599 => ErrorKind::Unavailable,
        _ => ErrorKind::BackendJobFailed,
    }
}

/// Pull a human readable message out of an error body
///
/// Accepts `{"error": {"message": ...}}`, `{"error": "..."}`, `{"message": ...}`
/// or plain text, which is returned verbatim.
fn extract_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty error response".to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    trimmed.to_string()
}

/// Error reported by an external job about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    /// `google.rpc.Code`-style numeric code, when the backend gives one
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: String,
}

impl BackendError {
    /// Infrastructure failures (deadline, aborted, internal, unavailable) are
    /// worth a fresh attempt; everything else is the job's own verdict.
    pub fn is_transient(&self) -> bool {
        matches!(self.code, Some(4 | 10 | 13 | 14))
    }

    /// Stage error carrying the backend's message verbatim
    pub fn into_run_error(self) -> RunError {
        let retriable = self.is_transient();
        RunError::new(ErrorKind::BackendJobFailed, self.message).with_retriable(retriable)
    }
}
