//! Pipeline run domain types
//!
//! A [`PipelineRun`] is one promotion attempt for one logical model. The
//! transition methods on it are the single source of truth for how a run
//! moves forward; stores call them inside whatever atomic section they provide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::error::{ErrorKind, RunError};
use crate::domain::spec::PipelineSpec;
use crate::domain::stage::{Stage, StageResult};

const MAX_RUN_ID_LEN: usize = 128;

/// Caller-supplied or generated run identifier
///
/// Doubles as the prefix of every idempotency token the run sends out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid run id '{0}': expected 1-128 characters of [A-Za-z0-9._:-]")]
pub struct InvalidRunId(pub String);

impl RunId {
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidRunId> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.len() <= MAX_RUN_ID_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
        if valid {
            Ok(Self(value))
        } else {
            Err(InvalidRunId(value))
        }
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = InvalidRunId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RunId::parse(value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a run in the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    Train,
    Promote,
    Deploy,
    Validate,
    Done,
    Failed,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Done | RunStage::Failed)
    }

    /// The executable stage this position refers to, if any
    pub fn as_stage(self) -> Option<Stage> {
        match self {
            RunStage::Train => Some(Stage::Train),
            RunStage::Promote => Some(Stage::Promote),
            RunStage::Deploy => Some(Stage::Deploy),
            RunStage::Validate => Some(Stage::Validate),
            RunStage::Done | RunStage::Failed => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal recorded transition
    ///
    /// Forward by exactly one stage, any live stage to FAILED, or FAILED back
    /// into a stage for an explicit retry.
    pub fn can_transition_to(self, to: RunStage) -> bool {
        match (self.as_stage(), to) {
            (Some(_), RunStage::Failed) => true,
            (Some(stage), to) => RunStage::after(stage) == to,
            (None, to) => self == RunStage::Failed && to.as_stage().is_some(),
        }
    }

    fn after(stage: Stage) -> RunStage {
        stage.next().map(RunStage::from).unwrap_or(RunStage::Done)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Train => "TRAIN",
            RunStage::Promote => "PROMOTE",
            RunStage::Deploy => "DEPLOY",
            RunStage::Validate => "VALIDATE",
            RunStage::Done => "DONE",
            RunStage::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<RunStage> {
        match s {
            "TRAIN" => Some(RunStage::Train),
            "PROMOTE" => Some(RunStage::Promote),
            "DEPLOY" => Some(RunStage::Deploy),
            "VALIDATE" => Some(RunStage::Validate),
            "DONE" => Some(RunStage::Done),
            "FAILED" => Some(RunStage::Failed),
            _ => None,
        }
    }
}

impl From<Stage> for RunStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Train => RunStage::Train,
            Stage::Promote => RunStage::Promote,
            Stage::Deploy => RunStage::Deploy,
            Stage::Validate => RunStage::Validate,
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Succeeded,
    Failed,
}

/// What a stage produced once it reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    pub output_id: Option<String>,
    pub status: StageStatus,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One recorded change of `current_stage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: RunStage,
    pub to: RunStage,
    pub at: DateTime<Utc>,
}

/// Rejected mutation of a run record
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("stage {stage} cannot be recorded while run is at {current}")]
    OutOfOrder { stage: Stage, current: RunStage },

    #[error("run is not in FAILED state (current: {0})")]
    NotFailed(RunStage),

    #[error("run is not terminal (current: {0})")]
    NotTerminal(RunStage),

    #[error("failed run has no failed stage recorded")]
    MissingFailedStage,

    #[error("run was torn down; start a new run instead")]
    TornDown,
}

/// One promotion attempt for one logical model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub spec: PipelineSpec,
    pub current_stage: RunStage,
    /// Populated only for stages that reached a terminal state
    pub stage_outputs: BTreeMap<Stage, StageOutput>,
    /// Handles of in-flight external operations (training job, deploy operation)
    pub pending: BTreeMap<Stage, String>,
    /// Bumped whenever a stage must deliberately create a fresh external resource
    pub generations: BTreeMap<Stage, u32>,
    pub failed_stage: Option<Stage>,
    /// Present only when `current_stage` is FAILED
    pub last_error: Option<RunError>,
    pub history: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub torn_down_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(run_id: RunId, spec: PipelineSpec) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            spec,
            current_stage: RunStage::Train,
            stage_outputs: BTreeMap::new(),
            pending: BTreeMap::new(),
            generations: BTreeMap::new(),
            failed_stage: None,
            last_error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            torn_down_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_stage.is_terminal()
    }

    pub fn output(&self, stage: Stage) -> Option<&StageOutput> {
        self.stage_outputs.get(&stage)
    }

    /// Output id of a stage that completed successfully
    pub fn succeeded_output(&self, stage: Stage) -> Option<&str> {
        self.stage_outputs
            .get(&stage)
            .filter(|o| o.status == StageStatus::Succeeded)
            .and_then(|o| o.output_id.as_deref())
    }

    pub fn has_succeeded(&self, stage: Stage) -> bool {
        self.stage_outputs
            .get(&stage)
            .is_some_and(|o| o.status == StageStatus::Succeeded)
    }

    pub fn pending_handle(&self, stage: Stage) -> Option<&str> {
        self.pending.get(&stage).map(String::as_str)
    }

    pub fn generation(&self, stage: Stage) -> u32 {
        self.generations.get(&stage).copied().unwrap_or(0)
    }

    /// Key that lets a backend recognize a repeated create call for this stage
    pub fn idempotency_token(&self, stage: Stage) -> String {
        format!("{}.{}.{}", self.run_id, stage.key(), self.generation(stage))
    }

    /// Records the outcome of a stage
    ///
    /// Returns `Ok(false)` when the call changes nothing: a stage that already
    /// holds a terminal output keeps it (first result wins), retriable failures
    /// leave no trace, and terminal runs are immutable.
    pub fn apply_stage_result(
        &mut self,
        stage: Stage,
        result: &StageResult,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.stage_outputs.contains_key(&stage) || self.is_terminal() {
            return Ok(false);
        }
        self.expect_current(stage)?;
        if result.retriable || result.is_cancelled() {
            return Ok(false);
        }

        if result.succeeded {
            self.stage_outputs.insert(
                stage,
                StageOutput {
                    output_id: result.output_id.clone(),
                    status: StageStatus::Succeeded,
                    detail: result.detail.clone(),
                    recorded_at: now,
                },
            );
            self.pending.remove(&stage);
            self.transition(RunStage::after(stage), now);
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| {
                    RunError::new(ErrorKind::Internal, "stage failed without an error")
                })
                .at_stage(stage);
            self.stage_outputs.insert(
                stage,
                StageOutput {
                    output_id: result
                        .partial_handle
                        .clone()
                        .or_else(|| result.output_id.clone()),
                    status: StageStatus::Failed,
                    detail: result.detail.clone(),
                    recorded_at: now,
                },
            );
            self.failed_stage = Some(stage);
            self.last_error = Some(error);
            self.transition(RunStage::Failed, now);
        }

        Ok(true)
    }

    /// Ends the run in FAILED without recording a stage output
    ///
    /// Used for exhausted retries and cancellation, where the external work
    /// may still be alive and an explicit retry should pick it up again.
    pub fn fail(
        &mut self,
        stage: Stage,
        error: RunError,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.is_terminal() {
            return Ok(false);
        }
        self.expect_current(stage)?;

        self.failed_stage = Some(stage);
        self.last_error = Some(error.at_stage(stage));
        self.transition(RunStage::Failed, now);
        Ok(true)
    }

    /// Remembers the handle of an in-flight external operation
    ///
    /// The first recorded handle wins; later writers get it back unchanged.
    pub fn record_pending(
        &mut self,
        stage: Stage,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.pending.contains_key(&stage) {
            return Ok(false);
        }
        self.expect_current(stage)?;
        self.pending.insert(stage, handle.to_string());
        self.updated_at = now;
        Ok(true)
    }

    /// Forgets a dead external operation so the next attempt creates a new one
    pub fn discard_pending(&mut self, stage: Stage, handle: &str, now: DateTime<Utc>) -> bool {
        if self.pending.get(&stage).map(String::as_str) != Some(handle) {
            return false;
        }
        self.pending.remove(&stage);
        self.bump_generation(stage);
        self.updated_at = now;
        true
    }

    /// Re-enters the failed stage of a FAILED run
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<Stage, TransitionError> {
        if self.current_stage != RunStage::Failed {
            return Err(TransitionError::NotFailed(self.current_stage));
        }
        // Its endpoint is gone, so Validate has nothing left to check
        if self.torn_down_at.is_some() {
            return Err(TransitionError::TornDown);
        }
        let stage = self.failed_stage.ok_or(TransitionError::MissingFailedStage)?;

        // A permanently failed external job cannot be reused; anything else
        // (timeout, cancellation) is picked up again through its pending handle.
        if self
            .stage_outputs
            .get(&stage)
            .is_some_and(|o| o.status == StageStatus::Failed)
        {
            self.stage_outputs.remove(&stage);
            self.pending.remove(&stage);
            self.bump_generation(stage);
        }

        self.failed_stage = None;
        self.last_error = None;
        self.transition(RunStage::from(stage), now);
        Ok(stage)
    }

    pub fn mark_torn_down(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.is_terminal() {
            return Err(TransitionError::NotTerminal(self.current_stage));
        }
        self.torn_down_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn expect_current(&self, stage: Stage) -> Result<(), TransitionError> {
        if self.current_stage.as_stage() == Some(stage) {
            Ok(())
        } else {
            Err(TransitionError::OutOfOrder {
                stage,
                current: self.current_stage,
            })
        }
    }

    fn bump_generation(&mut self, stage: Stage) {
        *self.generations.entry(stage).or_insert(0) += 1;
    }

    fn transition(&mut self, to: RunStage, now: DateTime<Utc>) {
        debug_assert!(self.current_stage.can_transition_to(to));
        self.history.push(StageTransition {
            from: self.current_stage,
            to,
            at: now,
        });
        self.current_stage = to;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::Hyperparameters;

    fn run() -> PipelineRun {
        PipelineRun::new(
            RunId::parse("run-1").unwrap(),
            PipelineSpec {
                base_model: "gemini-1.5-flash-002".to_string(),
                dataset_uri: "gs://bucket/train.jsonl".to_string(),
                hyperparameters: Hyperparameters::default(),
                tuned_model_name: None,
                dest_scope: "projects/target".to_string(),
                dest_name: "target-model".to_string(),
                source_artifact: None,
            },
        )
    }

    fn assert_monotonic(run: &PipelineRun) {
        for t in &run.history {
            assert!(
                t.from.can_transition_to(t.to),
                "illegal transition {} -> {}",
                t.from,
                t.to
            );
        }
    }

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::parse("run-2024.01_a:b").is_ok());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("has space").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("x".repeat(129)).is_err());
        assert!(serde_json::from_str::<RunId>("\"../etc\"").is_err());
    }

    #[test]
    fn test_success_advances_through_all_stages() {
        let mut run = run();
        let now = Utc::now();

        assert!(
            run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), now)
                .unwrap()
        );
        assert_eq!(run.current_stage, RunStage::Promote);
        assert_eq!(run.succeeded_output(Stage::Train), Some("art-1"));

        run.apply_stage_result(Stage::Promote, &StageResult::success("dst-1"), now)
            .unwrap();
        run.apply_stage_result(Stage::Deploy, &StageResult::success("ep-1"), now)
            .unwrap();
        run.apply_stage_result(Stage::Validate, &StageResult::passed("ok"), now)
            .unwrap();

        assert_eq!(run.current_stage, RunStage::Done);
        assert_eq!(run.history.len(), 4);
        assert_monotonic(&run);
    }

    #[test]
    fn test_first_success_wins() {
        let mut run = run();
        let now = Utc::now();
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), now)
            .unwrap();

        let changed = run
            .apply_stage_result(Stage::Train, &StageResult::success("art-2"), now)
            .unwrap();

        assert!(!changed);
        assert_eq!(run.succeeded_output(Stage::Train), Some("art-1"));
        assert_eq!(run.current_stage, RunStage::Promote);
    }

    #[test]
    fn test_out_of_order_commit_rejected() {
        let mut run = run();
        let err = run
            .apply_stage_result(Stage::Deploy, &StageResult::success("ep-1"), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::OutOfOrder {
                stage: Stage::Deploy,
                current: RunStage::Train
            }
        );
    }

    #[test]
    fn test_retriable_failure_leaves_no_output() {
        let mut run = run();
        run.record_pending(Stage::Train, "jobs/J1", Utc::now()).unwrap();

        let result = StageResult::failure(RunError::timeout("ceiling reached"));
        let changed = run
            .apply_stage_result(Stage::Train, &result, Utc::now())
            .unwrap();

        assert!(!changed);
        assert!(run.output(Stage::Train).is_none());
        assert_eq!(run.current_stage, RunStage::Train);
        assert_eq!(run.pending_handle(Stage::Train), Some("jobs/J1"));
        assert!(run.last_error.is_none());
    }

    #[test]
    fn test_permanent_failure_records_stage_and_error() {
        let mut run = run();
        let now = Utc::now();
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), now)
            .unwrap();

        let result = StageResult::failure(RunError::new(ErrorKind::Conflict, "lineage mismatch"));
        run.apply_stage_result(Stage::Promote, &result, now).unwrap();

        assert_eq!(run.current_stage, RunStage::Failed);
        assert_eq!(run.failed_stage, Some(Stage::Promote));
        let error = run.last_error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::Conflict);
        assert_eq!(error.stage, Some(Stage::Promote));
        assert_eq!(run.output(Stage::Promote).unwrap().status, StageStatus::Failed);

        // terminal runs ignore further commits
        assert!(
            !run.apply_stage_result(Stage::Promote, &StageResult::success("dst-1"), now)
                .unwrap()
        );
        assert_monotonic(&run);
    }

    #[test]
    fn test_pending_first_writer_wins() {
        let mut run = run();
        let now = Utc::now();
        assert!(run.record_pending(Stage::Train, "jobs/J1", now).unwrap());
        assert!(!run.record_pending(Stage::Train, "jobs/J2", now).unwrap());
        assert_eq!(run.pending_handle(Stage::Train), Some("jobs/J1"));
    }

    #[test]
    fn test_discard_pending_bumps_generation() {
        let mut run = run();
        let now = Utc::now();
        assert_eq!(run.idempotency_token(Stage::Train), "run-1.train.0");
        run.record_pending(Stage::Train, "jobs/J1", now).unwrap();

        assert!(!run.discard_pending(Stage::Train, "jobs/other", now));
        assert!(run.discard_pending(Stage::Train, "jobs/J1", now));
        assert!(run.pending_handle(Stage::Train).is_none());
        assert_eq!(run.idempotency_token(Stage::Train), "run-1.train.1");
    }

    #[test]
    fn test_retry_after_permanent_failure_gets_fresh_token() {
        let mut run = run();
        let now = Utc::now();
        run.record_pending(Stage::Train, "jobs/J1", now).unwrap();
        let failed = StageResult::failure(RunError::new(ErrorKind::BackendJobFailed, "diverged"));
        run.apply_stage_result(Stage::Train, &failed, now).unwrap();

        let stage = run.reset_for_retry(now).unwrap();

        assert_eq!(stage, Stage::Train);
        assert_eq!(run.current_stage, RunStage::Train);
        assert!(run.output(Stage::Train).is_none());
        assert!(run.pending_handle(Stage::Train).is_none());
        assert!(run.last_error.is_none());
        assert_eq!(run.idempotency_token(Stage::Train), "run-1.train.1");
        assert_monotonic(&run);
    }

    #[test]
    fn test_retry_after_exhaustion_keeps_pending_handle() {
        let mut run = run();
        let now = Utc::now();
        run.record_pending(Stage::Train, "jobs/J1", now).unwrap();
        run.fail(Stage::Train, RunError::timeout("ceiling"), now).unwrap();
        assert!(run.output(Stage::Train).is_none());

        run.reset_for_retry(now).unwrap();

        assert_eq!(run.pending_handle(Stage::Train), Some("jobs/J1"));
        assert_eq!(run.generation(Stage::Train), 0);
    }

    #[test]
    fn test_retry_requires_failed_run() {
        let mut run = run();
        assert_eq!(
            run.reset_for_retry(Utc::now()).unwrap_err(),
            TransitionError::NotFailed(RunStage::Train)
        );
    }

    #[test]
    fn test_torn_down_run_cannot_be_retried() {
        let mut run = run();
        let now = Utc::now();
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), now)
            .unwrap();
        run.apply_stage_result(Stage::Promote, &StageResult::success("dst-1"), now)
            .unwrap();
        run.apply_stage_result(Stage::Deploy, &StageResult::success("ep-1"), now)
            .unwrap();
        let failed = StageResult::failure(RunError::new(ErrorKind::BackendJobFailed, "empty reply"));
        run.apply_stage_result(Stage::Validate, &failed, now).unwrap();
        run.mark_torn_down(now).unwrap();

        assert_eq!(run.reset_for_retry(now).unwrap_err(), TransitionError::TornDown);
        assert_eq!(run.current_stage, RunStage::Failed);
        assert_eq!(run.failed_stage, Some(Stage::Validate));
    }

    #[test]
    fn test_transition_rules() {
        assert!(RunStage::Train.can_transition_to(RunStage::Promote));
        assert!(RunStage::Validate.can_transition_to(RunStage::Done));
        assert!(RunStage::Deploy.can_transition_to(RunStage::Failed));
        assert!(RunStage::Failed.can_transition_to(RunStage::Deploy));
        assert!(!RunStage::Train.can_transition_to(RunStage::Deploy));
        assert!(!RunStage::Promote.can_transition_to(RunStage::Train));
        assert!(!RunStage::Done.can_transition_to(RunStage::Failed));
        assert!(!RunStage::Failed.can_transition_to(RunStage::Done));
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut run = run();
        run.apply_stage_result(Stage::Train, &StageResult::success("art-1"), Utc::now())
            .unwrap();
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["current_stage"], "PROMOTE");
        assert_eq!(json["stage_outputs"]["TRAIN"]["output_id"], "art-1");
        let back: PipelineRun = serde_json::from_value(json).unwrap();
        assert_eq!(back, run);
    }
}
