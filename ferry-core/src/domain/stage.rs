//! Pipeline stages and stage results

use serde::{Deserialize, Serialize};

use crate::domain::error::{ErrorKind, RunError};

/// One executable step of the promotion pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Train,
    Promote,
    Deploy,
    Validate,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Train, Stage::Promote, Stage::Deploy, Stage::Validate];

    /// The stage that follows this one, `None` after Validate
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Train => Some(Stage::Promote),
            Stage::Promote => Some(Stage::Deploy),
            Stage::Deploy => Some(Stage::Validate),
            Stage::Validate => None,
        }
    }

    /// Short lowercase key used in idempotency tokens and storage keys
    pub fn key(self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Promote => "promote",
            Stage::Deploy => "deploy",
            Stage::Validate => "validate",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Train => "TRAIN",
            Stage::Promote => "PROMOTE",
            Stage::Deploy => "DEPLOY",
            Stage::Validate => "VALIDATE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage executor invocation
///
/// Executors never fail past their boundary; every outcome, including
/// cancellation and timeouts, is expressed as a `StageResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub succeeded: bool,
    pub output_id: Option<String>,
    pub retriable: bool,
    pub error: Option<RunError>,
    /// Handle of an external resource left behind by a failed attempt
    pub partial_handle: Option<String>,
    /// Free-form note kept with the stage output (e.g. a response excerpt)
    pub detail: Option<String>,
}

impl StageResult {
    pub fn success(output_id: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output_id: Some(output_id.into()),
            retriable: false,
            error: None,
            partial_handle: None,
            detail: None,
        }
    }

    /// Success for stages that produce a report rather than an identifier
    pub fn passed(detail: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output_id: None,
            retriable: false,
            error: None,
            partial_handle: None,
            detail: Some(detail.into()),
        }
    }

    pub fn failure(error: RunError) -> Self {
        Self {
            succeeded: false,
            output_id: None,
            retriable: error.retriable,
            error: Some(error),
            partial_handle: None,
            detail: None,
        }
    }

    pub fn with_partial_handle(mut self, handle: impl Into<String>) -> Self {
        self.partial_handle = Some(handle.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Cancelled)
    }

    /// Error kind of a failed result
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
