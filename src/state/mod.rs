//! Run state persistence
//!
//! Keeps what the host needs to report on a run: status, progress and the
//! terminal outcome. Currently uses in-memory; can be replaced with a database.

use crate::error::OrchestrationError;
use crate::models::{CompletedReport, Phase, ProgressEvent};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub attempt_number: u32,
    pub phase: Option<Phase>,
    pub result: Option<CompletedReport>,
    /// Categorical message only, never a raw remote body
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    fn new(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Running,
            attempt_number: 0,
            phase: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trait for run persistence
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run_id: Uuid) -> Result<RunRecord>;
    async fn record_progress(&self, event: &ProgressEvent) -> Result<()>;
    async fn complete(&self, run_id: Uuid, report: CompletedReport) -> Result<()>;
    async fn fail(&self, run_id: Uuid, status: RunStatus, message: String) -> Result<()>;
    async fn load(&self, run_id: Uuid) -> Result<Option<RunRecord>>;
}

/// In-memory run store
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Apply `update` to a running record; terminal records are left alone
    async fn update_running(
        &self,
        run_id: Uuid,
        update: impl FnOnce(&mut RunRecord) + Send,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(&run_id)
            .ok_or(OrchestrationError::RunNotFound(run_id))?;

        if !record.status.is_terminal() {
            update(record);
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run_id: Uuid) -> Result<RunRecord> {
        let record = RunRecord::new(run_id);
        let mut runs = self.runs.write().await;
        runs.insert(run_id, record.clone());
        Ok(record)
    }

    async fn record_progress(&self, event: &ProgressEvent) -> Result<()> {
        let (attempt_number, phase) = (event.attempt_number, event.phase);
        self.update_running(event.run_id, move |record| {
            record.attempt_number = attempt_number;
            record.phase = Some(phase);
        })
        .await
    }

    async fn complete(&self, run_id: Uuid, report: CompletedReport) -> Result<()> {
        self.update_running(run_id, move |record| {
            record.status = RunStatus::Completed;
            record.attempt_number = report.attempts;
            record.phase = None;
            record.result = Some(report);
        })
        .await
    }

    async fn fail(&self, run_id: Uuid, status: RunStatus, message: String) -> Result<()> {
        self.update_running(run_id, move |record| {
            record.status = status;
            record.phase = None;
            record.error = Some(message);
        })
        .await
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }
}
