pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::state::StateRecord;
use crate::engine::types::*;

/// Self-describing serialization of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub state: StateRecord,
    /// Stage to run next when the execution continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_stage: Option<StageId>,
    /// Slot an external answer is written into on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_slot: Option<AnswerSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Keyed persistence for suspended and in-flight executions.
///
/// Implementations must be safe for concurrent use across execution ids.
/// Expired snapshots read as absent.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create or replace the snapshot for an execution.
    async fn put(&self, execution_id: &str, snapshot: &Snapshot) -> Result<()>;

    async fn get(&self, execution_id: &str) -> Result<Option<Snapshot>>;

    async fn delete(&self, execution_id: &str) -> Result<()>;

    /// List live snapshots, optionally filtered by status, newest first.
    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Snapshot>>;

    /// Remove expired snapshots; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}
