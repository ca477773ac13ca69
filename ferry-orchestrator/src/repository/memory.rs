//! In-memory Job State Store
//!
//! Used when no database is configured and by the orchestrator tests. Not
//! durable across restarts.

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::domain::run::{PipelineRun, RunId};
use ferry_core::domain::spec::PipelineSpec;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{JobStateStore, Result, RunUpdate, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<RunId, PipelineRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStateStore for MemoryStore {
    async fn create(&self, run_id: &RunId, spec: PipelineSpec) -> Result<PipelineRun> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(run_id) {
            return Err(StoreError::AlreadyExists(run_id.clone()));
        }

        let run = PipelineRun::new(run_id.clone(), spec);
        runs.insert(run_id.clone(), run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: &RunId) -> Result<PipelineRun> {
        self.runs
            .lock()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.clone()))
    }

    async fn list(&self) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.runs.lock().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn update(&self, run_id: &RunId, update: RunUpdate) -> Result<PipelineRun> {
        let mut runs = self.runs.lock().await;
        let stored = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.clone()))?;

        // Work on a copy so a rejected update leaves the record untouched
        let mut run = stored.clone();
        if update.apply(&mut run, Utc::now())? {
            *stored = run.clone();
        }
        Ok(run)
    }
}
