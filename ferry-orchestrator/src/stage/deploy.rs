//! Deploy stage: provision a serving endpoint for the promoted artifact
//!
//! A deploy operation that failed after allocating an endpoint is reported as
//! retriable with the endpoint as partial handle and stays on record. The next
//! attempt finds it, releases the partial endpoint and only then creates a new
//! operation under a fresh idempotency token.

use async_trait::async_trait;
use ferry_adapters::{AdapterError, DeployState, DeployStatus, DeploymentService};
use ferry_core::domain::error::{ErrorKind, RunError};
use ferry_core::domain::run::PipelineRun;
use ferry_core::domain::stage::{Stage, StageResult};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::poll::poll_until;
use super::{StageContext, StageExecutor, bounded, prior_output};

pub struct DeployExecutor {
    deployment: Arc<dyn DeploymentService>,
}

impl DeployExecutor {
    pub fn new(deployment: Arc<dyn DeploymentService>) -> Self {
        Self { deployment }
    }

    async fn watch(
        &self,
        handle: &str,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> Result<DeployStatus, RunError> {
        poll_until(
            ctx,
            deadline,
            handle,
            || self.deployment.get_deploy_status(handle),
            |s: &DeployStatus| s.state.is_terminal(),
        )
        .await
    }

    /// Release what a dead operation left behind and drop its handle
    ///
    /// Returns the token for the replacement operation.
    async fn clean_up(
        &self,
        handle: &str,
        status: &DeployStatus,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> Result<String, RunError> {
        if let Some(endpoint) = &status.endpoint_id {
            info!(operation = %handle, endpoint = %endpoint, "Releasing partial endpoint");
            bounded(ctx, deadline, "partial endpoint release", self.deployment.undeploy(endpoint))
                .await?
                .map_err(|e| {
                    let retriable = e.is_transient();
                    e.into_run_error().with_retriable(retriable)
                })?;
        }
        ctx.checkpoint.discard_pending(Stage::Deploy, handle).await
    }

    /// Settle an operation found on record from an earlier attempt
    async fn settle_pending(
        &self,
        handle: &str,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> Result<Settled, StageResult> {
        info!(operation = %handle, "Checking deploy operation from an earlier attempt");
        let status = match self.watch(handle, ctx, deadline).await {
            Ok(status) => status,
            Err(e) if e.kind == ErrorKind::NotFound => {
                return ctx
                    .checkpoint
                    .discard_pending(Stage::Deploy, handle)
                    .await
                    .map(Settled::Cleared)
                    .map_err(StageResult::failure);
            }
            Err(e) => return Err(failure_keeping(handle, e)),
        };

        match (status.state, status.endpoint_id.clone()) {
            (DeployState::Succeeded, Some(endpoint)) => Ok(Settled::Deployed(endpoint)),
            _ => {
                warn!(operation = %handle, "Earlier deploy operation did not produce an endpoint");
                self.clean_up(handle, &status, ctx, deadline)
                    .await
                    .map(Settled::Cleared)
                    .map_err(|e| {
                        failure_keeping(status.endpoint_id.as_deref().unwrap_or(handle), e)
                    })
            }
        }
    }

    async fn deploy_fresh(
        &self,
        run: &PipelineRun,
        token: &str,
        ctx: &StageContext<'_>,
        deadline: Instant,
    ) -> StageResult {
        let artifact = match prior_output(run, Stage::Promote) {
            Ok(artifact) => artifact,
            Err(e) => return StageResult::failure(e),
        };

        let submitted = bounded(
            ctx,
            deadline,
            "deploy request",
            self.deployment.deploy(artifact, token),
        )
        .await
        .and_then(|r| r.map_err(AdapterError::into_run_error));
        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => return StageResult::failure(e),
        };

        info!(run_id = %run.run_id, operation = %handle, token = %token, "Deploy started");
        let handle = match ctx.checkpoint.record_pending(Stage::Deploy, &handle).await {
            Ok(handle) => handle,
            Err(e) => return StageResult::failure(e),
        };

        let status = match self.watch(&handle, ctx, deadline).await {
            Ok(status) => status,
            Err(e) => return failure_keeping(&handle, e),
        };

        match status.state {
            DeployState::Succeeded => match status.endpoint_id {
                Some(endpoint) => StageResult::success(endpoint),
                None => StageResult::failure(RunError::new(
                    ErrorKind::BackendJobFailed,
                    format!("deploy operation {} succeeded without an endpoint", handle),
                ))
                .with_partial_handle(handle),
            },
            _ => {
                let error = status
                    .error
                    .map(|e| e.into_run_error())
                    .unwrap_or_else(|| {
                        RunError::new(
                            ErrorKind::BackendJobFailed,
                            format!("deploy operation {} failed without an error", handle),
                        )
                    });

                match status.endpoint_id {
                    // Something was allocated: a retry must come back for it
                    Some(endpoint) => {
                        StageResult::failure(error.with_retriable(true)).with_partial_handle(endpoint)
                    }
                    None => StageResult::failure(error).with_partial_handle(handle),
                }
            }
        }
    }
}

enum Settled {
    Deployed(String),
    /// The old operation is gone; create a new one with this token
    Cleared(String),
}

/// Failure that leaves the operation on record for the next attempt
fn failure_keeping(handle: &str, error: RunError) -> StageResult {
    StageResult::failure(error).with_partial_handle(handle)
}

#[async_trait]
impl StageExecutor for DeployExecutor {
    fn stage(&self) -> Stage {
        Stage::Deploy
    }

    async fn execute(&self, run: &PipelineRun, ctx: &StageContext<'_>) -> StageResult {
        let deadline = ctx.deadline();
        let mut token = run.idempotency_token(Stage::Deploy);

        if let Some(handle) = run.pending_handle(Stage::Deploy) {
            match self.settle_pending(handle, ctx, deadline).await {
                Ok(Settled::Deployed(endpoint)) => return StageResult::success(endpoint),
                Ok(Settled::Cleared(next)) => token = next,
                Err(result) => return result,
            }
        }

        self.deploy_fresh(run, &token, ctx, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeDeployment, NEXT_TOKEN, RecordingCheckpoint, context, deploy, deploy_failed, spec,
    };
    use chrono::Utc;
    use ferry_core::domain::run::RunId;

    fn run_at_deploy() -> PipelineRun {
        let mut run = PipelineRun::new(RunId::parse("run-1").unwrap(), spec());
        let now = Utc::now();
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), now)
            .unwrap();
        run.apply_stage_result(Stage::Promote, &StageResult::success("dst-1"), now)
            .unwrap();
        run
    }

    #[tokio::test]
    async fn test_deploys_promoted_artifact() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![
            deploy(DeployState::Pending, None),
            deploy(DeployState::Running, None),
            deploy(DeployState::Succeeded, Some("ep-1")),
        ]));
        let executor = DeployExecutor::new(deployment.clone());
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_deploy(), &context(&checkpoint, 1_000))
            .await;

        assert_eq!(result.output_id.as_deref(), Some("ep-1"));
        assert_eq!(deployment.tokens(), vec!["run-1.deploy.0"]);
    }

    #[tokio::test]
    async fn test_never_terminal_times_out_retriably() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![deploy(
            DeployState::Running,
            None,
        )]));
        let executor = DeployExecutor::new(deployment);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_deploy(), &context(&checkpoint, 20))
            .await;

        assert!(!result.succeeded);
        assert!(result.retriable);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.partial_handle.as_deref(), Some("operations/op-1"));
    }

    #[tokio::test]
    async fn test_partial_endpoint_is_reported_retriable() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![deploy_failed(
            Some("ep-partial"),
            9,
            "health check never passed",
        )]));
        let executor = DeployExecutor::new(deployment.clone());
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_deploy(), &context(&checkpoint, 1_000))
            .await;

        assert!(result.retriable);
        assert_eq!(result.partial_handle.as_deref(), Some("ep-partial"));
        assert!(deployment.undeployed().is_empty());
        assert!(checkpoint.discarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_releases_partial_endpoint_before_redeploying() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![
            deploy_failed(Some("ep-partial"), 9, "health check never passed"),
            deploy(DeployState::Succeeded, Some("ep-2")),
        ]));
        let executor = DeployExecutor::new(deployment.clone());
        let checkpoint = RecordingCheckpoint::default();

        let mut run = run_at_deploy();
        run.record_pending(Stage::Deploy, "operations/op-1", Utc::now())
            .unwrap();

        let result = executor.execute(&run, &context(&checkpoint, 1_000)).await;

        assert_eq!(result.output_id.as_deref(), Some("ep-2"));
        assert_eq!(deployment.undeployed(), vec!["ep-partial"]);
        assert_eq!(
            checkpoint.discarded.lock().unwrap().as_slice(),
            &[(Stage::Deploy, "operations/op-1".to_string())]
        );
        assert_eq!(deployment.tokens(), vec![NEXT_TOKEN]);
    }

    #[tokio::test]
    async fn test_resumed_success_is_reused() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![deploy(
            DeployState::Succeeded,
            Some("ep-1"),
        )]));
        let executor = DeployExecutor::new(deployment.clone());
        let checkpoint = RecordingCheckpoint::default();
        let mut run = run_at_deploy();
        run.record_pending(Stage::Deploy, "operations/op-1", Utc::now())
            .unwrap();

        let result = executor.execute(&run, &context(&checkpoint, 1_000)).await;

        assert_eq!(result.output_id.as_deref(), Some("ep-1"));
        assert_eq!(deployment.deploy_calls(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_without_allocation() {
        let deployment = Arc::new(FakeDeployment::with_statuses(vec![deploy_failed(
            None,
            3,
            "artifact format not servable",
        )]));
        let executor = DeployExecutor::new(deployment);
        let checkpoint = RecordingCheckpoint::default();

        let result = executor
            .execute(&run_at_deploy(), &context(&checkpoint, 1_000))
            .await;

        assert!(!result.retriable);
        assert_eq!(result.error_kind(), Some(ErrorKind::BackendJobFailed));
        assert_eq!(result.error.unwrap().message, "artifact format not servable");
    }
}
