//! PostgreSQL Job State Store
//!
//! Each mutation runs in its own transaction: the row is locked with
//! `SELECT ... FOR UPDATE`, the update is applied in memory and the whole
//! record is written back before commit. Concurrent writers of one run are
//! serialized by the row lock, across processes as well as within one.

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::domain::error::RunError;
use ferry_core::domain::run::{PipelineRun, RunId, RunStage, StageOutput, StageTransition};
use ferry_core::domain::spec::PipelineSpec;
use ferry_core::domain::stage::Stage;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;

use super::{JobStateStore, Result, RunUpdate, StoreError};

const SELECT_RUN: &str = r#"
    SELECT run_id, current_stage, failed_stage, spec, stage_outputs, pending,
           generations, last_error, history, created_at, updated_at, torn_down_at
    FROM pipeline_runs
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write(tx: &mut Transaction<'_, Postgres>, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET current_stage = $2, failed_stage = $3, stage_outputs = $4, pending = $5,
                generations = $6, last_error = $7, history = $8, updated_at = $9,
                torn_down_at = $10
            WHERE run_id = $1
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.current_stage.as_str())
        .bind(run.failed_stage.map(|s| s.as_str()))
        .bind(Json(&run.stage_outputs))
        .bind(Json(&run.pending))
        .bind(Json(&run.generations))
        .bind(run.last_error.as_ref().map(Json))
        .bind(Json(&run.history))
        .bind(run.updated_at)
        .bind(run.torn_down_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl JobStateStore for PostgresStore {
    async fn create(&self, run_id: &RunId, spec: PipelineSpec) -> Result<PipelineRun> {
        let run = PipelineRun::new(run_id.clone(), spec);

        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (run_id, current_stage, spec, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.current_stage.as_str())
        .bind(Json(&run.spec))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(run_id.clone()));
        }

        tracing::debug!(run_id = %run_id, "Run record created");
        Ok(run)
    }

    async fn get(&self, run_id: &RunId) -> Result<PipelineRun> {
        let row = sqlx::query_as::<_, RunRow>(&format!("{} WHERE run_id = $1", SELECT_RUN))
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(run_id.clone()))?;

        row.try_into()
    }

    async fn list(&self) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!("{} ORDER BY created_at DESC", SELECT_RUN))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn update(&self, run_id: &RunId, update: RunUpdate) -> Result<PipelineRun> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RunRow>(&format!(
            "{} WHERE run_id = $1 FOR UPDATE",
            SELECT_RUN
        ))
        .bind(run_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(run_id.clone()))?;

        let mut run = PipelineRun::try_from(row)?;

        // An error here drops the transaction, which rolls it back
        if update.apply(&mut run, Utc::now())? {
            Self::write(&mut tx, &run).await?;
        }
        tx.commit().await?;

        Ok(run)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    current_stage: String,
    failed_stage: Option<String>,
    spec: Json<PipelineSpec>,
    stage_outputs: Json<BTreeMap<Stage, StageOutput>>,
    pending: Json<BTreeMap<Stage, String>>,
    generations: Json<BTreeMap<Stage, u32>>,
    last_error: Option<Json<RunError>>,
    history: Json<Vec<StageTransition>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    torn_down_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self> {
        let corrupt = |reason: String| StoreError::Corrupt {
            run_id: row.run_id.clone(),
            reason,
        };

        let run_id = RunId::parse(row.run_id.clone()).map_err(|e| corrupt(e.to_string()))?;
        let current_stage = RunStage::parse(&row.current_stage)
            .ok_or_else(|| corrupt(format!("unknown stage '{}'", row.current_stage)))?;
        let failed_stage = match row.failed_stage.as_deref() {
            Some(name) => Some(
                RunStage::parse(name)
                    .and_then(RunStage::as_stage)
                    .ok_or_else(|| corrupt(format!("unknown failed stage '{}'", name)))?,
            ),
            None => None,
        };

        Ok(PipelineRun {
            run_id,
            spec: row.spec.0,
            current_stage,
            stage_outputs: row.stage_outputs.0,
            pending: row.pending.0,
            generations: row.generations.0,
            failed_stage,
            last_error: row.last_error.map(|e| e.0),
            history: row.history.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            torn_down_at: row.torn_down_at,
        })
    }
}
