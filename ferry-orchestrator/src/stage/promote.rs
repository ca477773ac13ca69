//! Promote stage: copy the trained artifact into the destination scope

use async_trait::async_trait;
use ferry_adapters::{AdapterError, ArtifactRegistry, CopyArtifactRequest, CopyOutcome};
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::PipelineRun;
use ferry_core::domain::stage::{Stage, StageResult};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use super::{StageContext, StageExecutor, bounded, prior_output};

pub struct PromoteExecutor {
    registry: Arc<dyn ArtifactRegistry>,
}

impl PromoteExecutor {
    pub fn new(registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self { registry }
    }

    async fn promote(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> Result<String, RunError> {
        let deadline = ctx.deadline();
        let source = prior_output(run, Stage::Train)?;
        let request = CopyArtifactRequest {
            source_id: source.to_string(),
            dest_scope: run.spec.dest_scope.clone(),
            dest_name: run.spec.dest_name.clone(),
        };
        let token = run.idempotency_token(Stage::Promote);

        let outcome = bounded(
            ctx,
            deadline,
            "artifact copy",
            self.registry.copy_artifact(&request, &token),
        )
        .await?
        .map_err(AdapterError::into_run_error)?;

        match outcome {
            CopyOutcome::Copied(artifact) => {
                info!(run_id = %run.run_id, artifact = %artifact, "Artifact promoted");
                Ok(artifact)
            }
            CopyOutcome::AlreadyExists {
                existing_id,
                source_id,
            } => {
                let lineage = match source_id {
                    Some(lineage) => Some(lineage),
                    None => self.lineage_of(&existing_id, ctx, deadline).await?,
                };

                if lineage.as_deref() == Some(source) {
                    info!(
                        run_id = %run.run_id,
                        artifact = %existing_id,
                        "Destination already holds this run's artifact"
                    );
                    Ok(existing_id)
                } else {
                    Err(RunError::new(
                        ErrorKind::Conflict,
                        format!(
                            "destination {}/{} already holds {} copied from {}, not {}",
                            request.dest_scope,
                            request.dest_name,
                            existing_id,
                            lineage.as_deref().unwrap_or("an unknown source"),
                            source
                        ),
                    ))
                }
            }
        }
    }

    async fn lineage_of(
        &self,
        artifact_id: &str,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> Result<Option<String>, RunError> {
        let info = bounded(
            ctx,
            deadline,
            "artifact lookup",
            self.registry.get_artifact(artifact_id),
        )
        .await?
        .map_err(AdapterError::into_run_error)?;
        Ok(info.source_artifact_id)
    }
}

#[async_trait]
impl StageExecutor for PromoteExecutor {
    fn stage(&self) -> Stage {
        Stage::Promote
    }

    async fn execute(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> StageResult {
        match self.promote(run, ctx).await {
            Ok(artifact) => StageResult::success(artifact),
            Err(e) => StageResult::failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRegistry, RecordingCheckpoint, context, spec};
    use chrono::Utc;
    use ferry_adapters::ArtifactInfo;
    use ferry_core::domain::run::RunId;

    fn run_at_promote() -> PipelineRun {
        let mut run = PipelineRun::new(RunId::parse("run-1").unwrap(), spec());
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), Utc::now())
            .unwrap();
        run
    }

    fn exists(existing: &str, source: Option<&str>) -> Result<CopyOutcome, AdapterError> {
        Ok(CopyOutcome::AlreadyExists {
            existing_id: existing.to_string(),
            source_id: source.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_copies_train_output() {
        let registry = Arc::new(FakeRegistry::default());
        let executor = PromoteExecutor::new(registry.clone());
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_promote(), &context(&checkpoint, 1_000))
            .await;

        assert_eq!(result.output_id.as_deref(), Some("dst-1"));
        let requests = registry.requests.lock().unwrap();
        assert_eq!(requests[0].source_id, "art-1");
        assert_eq!(requests[0].dest_name, "target-model");
    }

    #[tokio::test]
    async fn test_existing_copy_with_matching_lineage_is_success() {
        let registry = Arc::new(FakeRegistry::with_outcomes(vec![exists(
            "dst-1",
            Some("art-1"),
        )]));
        let executor = PromoteExecutor::new(registry);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_promote(), &context(&checkpoint, 1_000))
            .await;

        assert!(result.succeeded);
        assert_eq!(result.output_id.as_deref(), Some("dst-1"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_lineage_is_looked_up_when_not_reported() {
        let registry = Arc::new(FakeRegistry::with_outcomes(vec![exists("dst-1", None)]));
        registry.artifacts.lock().unwrap().insert(
            "dst-1".to_string(),
            ArtifactInfo {
                artifact_id: "dst-1".to_string(),
                source_artifact_id: Some("art-1".to_string()),
            },
        );
        let executor = PromoteExecutor::new(registry);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_promote(), &context(&checkpoint, 1_000))
            .await;

        assert_eq!(result.output_id.as_deref(), Some("dst-1"));
    }

    #[tokio::test]
    async fn test_foreign_lineage_is_a_conflict() {
        let registry = Arc::new(FakeRegistry::with_outcomes(vec![exists(
            "dst-1",
            Some("art-other"),
        )]));
        let executor = PromoteExecutor::new(registry);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_promote(), &context(&checkpoint, 1_000))
            .await;

        assert!(!result.succeeded);
        assert!(!result.retriable);
        assert_eq!(result.error_kind(), Some(ErrorKind::Conflict));
        assert!(result.error.unwrap().message.contains("art-other"));
    }

    #[tokio::test]
    async fn test_unavailable_registry_is_retriable() {
        let registry = Arc::new(FakeRegistry::with_outcomes(vec![Err(AdapterError::new(
            ErrorKind::Unavailable,
            "registry overloaded",
        ))]));
        let executor = PromoteExecutor::new(registry);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_promote(), &context(&checkpoint, 1_000))
            .await;

        assert!(result.retriable);
        assert_eq!(result.error_kind(), Some(ErrorKind::Unavailable));
    }
}
