//! Store integration tests over temporary SQLite files.

use super::{DownloadRecord, Store};
use crate::config::DatabaseConfig;
use crate::types::{FailureKind, MediaItem, MediaKind, Provider, Quality, Task, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn db_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("ledger.db"),
        ..DatabaseConfig::default()
    }
}

async fn open_store(dir: &TempDir) -> Store {
    Store::new(&db_config(dir)).await.unwrap()
}

fn task(item_id: &str) -> Task {
    let item = MediaItem {
        provider: Provider::Qobuz,
        item_id: item_id.to_string(),
        label: format!("Track {item_id}"),
        file_name: format!("{item_id}.flac"),
        quality: Quality(3),
        kind: MediaKind::Audio,
    };
    Task::new(&item, PathBuf::from(format!("/music/{item_id}.flac")))
}

#[tokio::test]
async fn fresh_store_has_no_records() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let t = task("1");
    assert!(!store.is_completed(&t.id).await.unwrap());
    assert!(!store.is_failed(&t.id).await.unwrap());
    assert_eq!(store.count_completed().await.unwrap(), 0);
    assert_eq!(store.count_failed().await.unwrap(), 0);
    assert!(store.list_failed().await.unwrap().is_empty());
}

#[tokio::test]
async fn record_success_makes_task_completed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("1");

    store.record_success(&t, 4_096).await.unwrap();

    assert!(store.is_completed(&t.id).await.unwrap());
    assert!(!store.is_failed(&t.id).await.unwrap());
    assert_eq!(store.count_completed().await.unwrap(), 1);
}

#[tokio::test]
async fn record_success_twice_upserts_a_single_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("1");

    store.record_success(&t, 100).await.unwrap();
    store.record_success(&t, 200).await.unwrap();

    assert_eq!(
        store.count_completed().await.unwrap(),
        1,
        "same task id must not produce duplicate completed rows"
    );
}

#[tokio::test]
async fn forget_completed_removes_the_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("1");

    store.record_success(&t, 100).await.unwrap();
    assert!(store.forget_completed(&t.id).await.unwrap());
    assert!(!store.is_completed(&t.id).await.unwrap());

    // Second delete finds nothing
    assert!(!store.forget_completed(&t.id).await.unwrap());
}

#[tokio::test]
async fn record_failure_round_trips_through_list_failed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("42");

    store
        .record_failure(&t, FailureKind::NotFound, "track removed from catalog")
        .await
        .unwrap();

    assert!(store.is_failed(&t.id).await.unwrap());
    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);

    let record = &failed[0];
    assert_eq!(record.task_id, t.id);
    assert_eq!(record.provider, "qobuz");
    assert_eq!(record.item_id, "42");
    assert_eq!(record.quality, 3);
    assert_eq!(record.kind, "audio");
    assert_eq!(record.destination, "/music/42.flac");
    assert_eq!(record.error_kind, "not_found");
    assert_eq!(record.message, "track removed from catalog");
    assert!(record.failed_at > 0);
}

#[tokio::test]
async fn repeated_failure_refreshes_classification_without_duplicating() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("42");

    store
        .record_failure(&t, FailureKind::Transient, "timeout")
        .await
        .unwrap();
    store
        .record_failure(&t, FailureKind::NotFound, "now gone for good")
        .await
        .unwrap();

    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind, "not_found");
    assert_eq!(failed[0].message, "now gone for good");
}

#[tokio::test]
async fn clear_failure_removes_the_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let t = task("42");

    store
        .record_failure(&t, FailureKind::Transient, "timeout")
        .await
        .unwrap();
    assert!(store.clear_failure(&t.id).await.unwrap());
    assert!(!store.is_failed(&t.id).await.unwrap());
    assert!(!store.clear_failure(&t.id).await.unwrap());
}

#[tokio::test]
async fn failed_record_rebuilds_the_original_task() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let original = task("99");

    store
        .record_failure(&original, FailureKind::RateLimited, "window exhausted")
        .await
        .unwrap();

    let failed = store.list_failed().await.unwrap();
    let rebuilt = failed[0].to_task().unwrap();

    assert_eq!(rebuilt.id, original.id);
    assert_eq!(rebuilt.provider, original.provider);
    assert_eq!(rebuilt.item_id, original.item_id);
    assert_eq!(rebuilt.destination, original.destination);
    assert_eq!(rebuilt.quality, original.quality);
    assert_eq!(rebuilt.kind, original.kind);
}

#[tokio::test]
async fn record_with_unknown_provider_fails_reconstruction() {
    let record = DownloadRecord {
        task_id: TaskId::new("deadbeef"),
        provider: "napster".into(),
        item_id: "1".into(),
        label: "x".into(),
        quality: 1,
        kind: "audio".into(),
        destination: "/music/x.flac".into(),
        error_kind: "transient".into(),
        message: "m".into(),
        failed_at: 0,
    };

    let err = record.to_task().unwrap_err();
    assert!(
        matches!(err, crate::error::Error::InvalidRecord { .. }),
        "got {err}"
    );
}

#[tokio::test]
async fn disabled_completed_ledger_reads_empty_and_swallows_writes() {
    let dir = TempDir::new().unwrap();
    let mut config = db_config(&dir);
    config.completed_enabled = false;
    let store = Store::new(&config).await.unwrap();
    let t = task("1");

    store.record_success(&t, 100).await.unwrap();

    assert!(!store.is_completed(&t.id).await.unwrap());
    assert_eq!(store.count_completed().await.unwrap(), 0);
}

#[tokio::test]
async fn disabled_failed_ledger_reads_empty_and_swallows_writes() {
    let dir = TempDir::new().unwrap();
    let mut config = db_config(&dir);
    config.failed_enabled = false;
    let store = Store::new(&config).await.unwrap();
    let t = task("1");

    store
        .record_failure(&t, FailureKind::Transient, "timeout")
        .await
        .unwrap();

    assert!(!store.is_failed(&t.id).await.unwrap());
    assert!(store.list_failed().await.unwrap().is_empty());
}

#[tokio::test]
async fn records_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let completed_task = task("done");
    let failed_task = task("broken");

    {
        let store = open_store(&dir).await;
        store.record_success(&completed_task, 1_000).await.unwrap();
        store
            .record_failure(&failed_task, FailureKind::Transient, "timeout")
            .await
            .unwrap();
    }

    // Reopen the same file, as after a process restart
    let store = open_store(&dir).await;
    assert!(store.is_completed(&completed_task.id).await.unwrap());
    assert!(store.is_failed(&failed_task.id).await.unwrap());
}

#[tokio::test]
async fn list_failed_returns_oldest_first() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    // Same-second timestamps fall back to task id ordering, so just
    // verify both rows come back and the ordering fields are present.
    store
        .record_failure(&task("a"), FailureKind::Transient, "first")
        .await
        .unwrap();
    store
        .record_failure(&task("b"), FailureKind::Transient, "second")
        .await
        .unwrap();

    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed[0].failed_at <= failed[1].failed_at);
}

#[tokio::test]
async fn concurrent_writers_on_disjoint_keys_all_land() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let t = task(&format!("item-{i}"));
            store.record_success(&t, 10).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.count_completed().await.unwrap(), 8);
}
