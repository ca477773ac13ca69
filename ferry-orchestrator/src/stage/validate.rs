//! Validate stage: one smoke-test inference call against the new endpoint
//!
//! Only checks that a non-empty, error-free reply comes back. A failure here
//! never touches the Deploy output.

use async_trait::async_trait;
use ferry_adapters::InferenceService;
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::PipelineRun;
use ferry_core::domain::stage::{Stage, StageResult};
use std::sync::Arc;
use tracing::info;

use super::{StageContext, StageExecutor, bounded, prior_output};

const EXCERPT_CHARS: usize = 200;

pub struct ValidateExecutor {
    inference: Arc<dyn InferenceService>,
}

impl ValidateExecutor {
    pub fn new(inference: Arc<dyn InferenceService>) -> Self {
        Self { inference }
    }

    async fn smoke_test(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> Result<String, RunError> {
        let endpoint = prior_output(run, Stage::Deploy)?;

        let reply = bounded(
            ctx,
            ctx.deadline(),
            "smoke test",
            self.inference.invoke(endpoint, ctx.validation_prompt),
        )
        .await?
        .map_err(|e| {
            if e.is_transient() {
                e.into_run_error()
            } else {
                RunError::new(
                    ErrorKind::BackendJobFailed,
                    format!("smoke test against {} failed: {}", endpoint, e),
                )
            }
        })?;

        let text = reply.text.trim();
        if text.is_empty() {
            return Err(RunError::new(
                ErrorKind::BackendJobFailed,
                format!("endpoint {} returned an empty response", endpoint),
            ));
        }

        info!(run_id = %run.run_id, endpoint = %endpoint, "Smoke test passed");
        Ok(excerpt(text))
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl StageExecutor for ValidateExecutor {
    fn stage(&self) -> Stage {
        Stage::Validate
    }

    async fn execute(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> StageResult {
        match self.smoke_test(run, ctx).await {
            Ok(excerpt) => StageResult::passed(excerpt),
            Err(e) => StageResult::failure(e),
        }
    }
}
