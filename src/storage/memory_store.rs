use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;

use crate::engine::types::ExecutionStatus;
use crate::storage::{Snapshot, SnapshotStore};

/// In-memory snapshot store.
/// Holds executions only for the lifetime of the store instance.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Snapshot>>> {
        self.snapshots
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, execution_id: &str, snapshot: &Snapshot) -> Result<()> {
        self.locked()?
            .insert(execution_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Snapshot>> {
        let now = Utc::now();
        Ok(self
            .locked()?
            .get(execution_id)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.locked()?.remove(execution_id);
        Ok(())
    }

    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Snapshot>> {
        let now = Utc::now();
        let mut out: Vec<Snapshot> = self
            .locked()?
            .values()
            .filter(|s| !s.is_expired(now))
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut snapshots = self.locked()?;
        let before = snapshots.len();
        snapshots.retain(|_, s| !s.is_expired(now));
        Ok(before - snapshots.len())
    }
}
