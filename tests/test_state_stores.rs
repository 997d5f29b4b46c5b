//! Tests for SnapshotStore implementations: JsonSnapshotStore and MemorySnapshotStore.

use chrono::{Duration, Utc};

use infraflow::engine::state::StateRecord;
use infraflow::engine::types::*;
use infraflow::storage::json_store::JsonSnapshotStore;
use infraflow::storage::memory_store::MemorySnapshotStore;
use infraflow::storage::{Snapshot, SnapshotStore};

fn snapshot(id: &str, status: ExecutionStatus, age_minutes: i64) -> Snapshot {
    let mut state = StateRecord::new(id, "a storage account", RequestConfig::default(), StageId::Requirements);
    state.artifact = Some("resource \"azurerm_resource_group\" \"rg\" {}".to_string());
    state.warnings.push("relaxed gate".to_string());
    let at = Utc::now() - Duration::minutes(age_minutes);
    Snapshot {
        execution_id: id.to_string(),
        status,
        state,
        resume_stage: Some(StageId::ApprovalDecision),
        answer_slot: Some(AnswerSlot::ApprovalResponse),
        reason: Some("Approval required".to_string()),
        created_at: at,
        updated_at: at,
        expires_at: Some(Utc::now() + Duration::hours(1)),
    }
}

fn expired(id: &str) -> Snapshot {
    let mut s = snapshot(id, ExecutionStatus::Completed, 120);
    s.expires_at = Some(Utc::now() - Duration::minutes(1));
    s
}

async fn put_and_get(store: &dyn SnapshotStore) {
    let original = snapshot("e1", ExecutionStatus::Suspended, 0);
    store.put("e1", &original).await.unwrap();

    let loaded = store.get("e1").await.unwrap().unwrap();
    assert_eq!(loaded, original);
    assert!(store.get("missing").await.unwrap().is_none());
}

async fn put_replaces(store: &dyn SnapshotStore) {
    store
        .put("e1", &snapshot("e1", ExecutionStatus::Running, 0))
        .await
        .unwrap();
    store
        .put("e1", &snapshot("e1", ExecutionStatus::Completed, 0))
        .await
        .unwrap();

    let loaded = store.get("e1").await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
}

async fn list_filters_and_orders(store: &dyn SnapshotStore) {
    store
        .put("old", &snapshot("old", ExecutionStatus::Suspended, 30))
        .await
        .unwrap();
    store
        .put("new", &snapshot("new", ExecutionStatus::Suspended, 1))
        .await
        .unwrap();
    store
        .put("done", &snapshot("done", ExecutionStatus::Completed, 5))
        .await
        .unwrap();
    store.put("gone", &expired("gone")).await.unwrap();

    let all = store.list(None).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.execution_id.as_str()).collect();
    assert_eq!(ids, vec!["new", "done", "old"]);

    let suspended = store.list(Some(ExecutionStatus::Suspended)).await.unwrap();
    assert_eq!(suspended.len(), 2);
}

async fn expired_reads_as_absent_and_purges(store: &dyn SnapshotStore) {
    store.put("gone", &expired("gone")).await.unwrap();
    store
        .put("kept", &snapshot("kept", ExecutionStatus::Suspended, 0))
        .await
        .unwrap();

    assert!(store.get("gone").await.unwrap().is_none());
    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert_eq!(store.purge_expired().await.unwrap(), 0);
    assert!(store.get("kept").await.unwrap().is_some());
}

async fn delete_removes(store: &dyn SnapshotStore) {
    store
        .put("e1", &snapshot("e1", ExecutionStatus::Running, 0))
        .await
        .unwrap();
    store.delete("e1").await.unwrap();
    assert!(store.get("e1").await.unwrap().is_none());
    // deleting twice is fine
    store.delete("e1").await.unwrap();
}

// ===== MemorySnapshotStore =====

#[tokio::test]
async fn memory_store_put_and_get() {
    put_and_get(&MemorySnapshotStore::new()).await;
}

#[tokio::test]
async fn memory_store_put_replaces() {
    put_replaces(&MemorySnapshotStore::new()).await;
}

#[tokio::test]
async fn memory_store_list() {
    list_filters_and_orders(&MemorySnapshotStore::new()).await;
}

#[tokio::test]
async fn memory_store_expiry() {
    expired_reads_as_absent_and_purges(&MemorySnapshotStore::new()).await;
}

#[tokio::test]
async fn memory_store_delete() {
    delete_removes(&MemorySnapshotStore::new()).await;
}

// ===== JsonSnapshotStore =====

#[tokio::test]
async fn json_store_put_and_get() {
    let dir = tempfile::tempdir().unwrap();
    put_and_get(&JsonSnapshotStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_put_replaces() {
    let dir = tempfile::tempdir().unwrap();
    put_replaces(&JsonSnapshotStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_list() {
    let dir = tempfile::tempdir().unwrap();
    list_filters_and_orders(&JsonSnapshotStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_expiry() {
    let dir = tempfile::tempdir().unwrap();
    expired_reads_as_absent_and_purges(&JsonSnapshotStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    delete_removes(&JsonSnapshotStore::new(dir.path())).await;
}

#[tokio::test]
async fn json_store_writes_one_readable_file_per_execution() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonSnapshotStore::new(dir.path());
    store
        .put("e1", &snapshot("e1", ExecutionStatus::Suspended, 0))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("e1.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["status"], "suspended");
    assert_eq!(value["resume_stage"], "approval_decision");
    assert_eq!(value["answer_slot"], "approval_response");
    assert_eq!(value["state"]["config"]["require_approval"], true);
    assert!(!dir.path().join("e1.json.tmp").exists());
}

#[tokio::test]
async fn json_store_skips_corrupt_files_when_listing() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonSnapshotStore::new(dir.path());
    store
        .put("good", &snapshot("good", ExecutionStatus::Suspended, 0))
        .await
        .unwrap();
    std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

    assert_eq!(store.list(None).await.unwrap().len(), 1);
    assert!(store.get("bad").await.is_err());
}

#[tokio::test]
async fn json_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonSnapshotStore::new(dir.path());
    let s = snapshot("x", ExecutionStatus::Running, 0);
    assert!(store.put("../escape", &s).await.is_err());
    assert!(store.get("a/b").await.is_err());
}

#[tokio::test]
async fn json_store_list_on_missing_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonSnapshotStore::new(dir.path().join("not-yet"));
    assert!(store.list(None).await.unwrap().is_empty());
    assert_eq!(store.purge_expired().await.unwrap(), 0);
}
