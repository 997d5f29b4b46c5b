use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::engine::types::ExecutionStatus;
use crate::storage::{Snapshot, SnapshotStore};

/// File-based JSON snapshot store. Each execution is stored as a separate JSON file.
pub struct JsonSnapshotStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonSnapshotStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn snapshot_path(&self, execution_id: &str) -> Result<PathBuf> {
        let valid = !execution_id.is_empty()
            && execution_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("Invalid execution id: {:?}", execution_id);
        }
        Ok(self.base_dir.join(format!("{}.json", execution_id)))
    }

    async fn read_snapshot(&self, path: &Path) -> Result<Option<Snapshot>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
        Ok(Some(snapshot))
    }

    async fn json_files(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn put(&self, execution_id: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.snapshot_path(execution_id)?;
        let _lock = self.lock.write().await;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("Failed to create store dir: {}", self.base_dir.display()))?;

        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write snapshot: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(execution_id)?;
        let _lock = self.lock.read().await;
        let snapshot = self.read_snapshot(&path).await?;
        Ok(snapshot.filter(|s| !s.is_expired(Utc::now())))
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        let path = self.snapshot_path(execution_id)?;
        let _lock = self.lock.write().await;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn list(&self, status: Option<ExecutionStatus>) -> Result<Vec<Snapshot>> {
        let _lock = self.lock.read().await;
        let now = Utc::now();

        let mut snapshots = Vec::new();
        for path in self.json_files().await? {
            // Unreadable files are skipped rather than failing the listing
            if let Ok(Some(snapshot)) = self.read_snapshot(&path).await {
                if snapshot.is_expired(now) {
                    continue;
                }
                if let Some(filter) = status
                    && snapshot.status != filter
                {
                    continue;
                }
                snapshots.push(snapshot);
            }
        }

        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(snapshots)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let _lock = self.lock.write().await;
        let now = Utc::now();

        let mut removed = 0;
        for path in self.json_files().await? {
            if let Ok(Some(snapshot)) = self.read_snapshot(&path).await
                && snapshot.is_expired(now)
            {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
