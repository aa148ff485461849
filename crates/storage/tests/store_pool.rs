#![forbid(unsafe_code)]

use cv_core::ids::{ClusterKey, ProjectId};
use cv_storage::{ClusterUpsertRequest, StoreConfig, StoreError, StorePool};
use std::time::Duration;

fn config(max_connections: usize) -> StoreConfig {
    StoreConfig {
        max_connections,
        busy_timeout: Duration::from_millis(500),
    }
}

#[test]
fn exhausted_pool_reports_retryable_unavailable() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = StorePool::open(dir.path(), config(2)).expect("open pool");

    let first = pool.acquire().expect("first connection");
    let second = pool.acquire().expect("second connection");
    assert_eq!(pool.in_use(), 2);

    let err = pool.acquire().expect_err("pool is full");
    match &err {
        StoreError::Unavailable { in_use, limit } => {
            assert_eq!(*in_use, 2);
            assert_eq!(*limit, 2);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(err.code(), "STORE_UNAVAILABLE");

    drop(first);
    assert_eq!(pool.in_use(), 1);
    let third = pool.acquire().expect("slot freed by drop");
    drop((second, third));
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn pooled_connections_see_each_others_writes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pool = StorePool::open(dir.path(), config(4)).expect("open pool");
    let project = ProjectId::try_new("library").expect("project id");
    let key = ClusterKey::try_new("alice").expect("cluster key");

    let mut writer = pool.acquire().expect("writer");
    writer
        .cluster_upsert(
            &project,
            ClusterUpsertRequest {
                key: key.clone(),
                label: Some("Alice".to_string()),
            },
        )
        .expect("cluster upsert");

    let reader = pool.acquire().expect("reader");
    let row = reader
        .cluster_get(&project, &key)
        .expect("cluster get")
        .expect("cluster visible");
    assert_eq!(row.label.as_deref(), Some("Alice"));
    assert_eq!(reader.storage_dir(), dir.path());
}

#[test]
fn pool_requires_at_least_one_connection() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = StorePool::open(dir.path(), config(0)).expect_err("zero limit");
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[test]
fn a_connection_that_cannot_open_reports_unavailable() {
    let dir = tempfile::tempdir().expect("temp dir");
    let storage_dir = dir.path().join("library");
    std::fs::create_dir(&storage_dir).expect("create storage dir");
    let pool = StorePool::open(&storage_dir, config(2)).expect("open pool");
    std::fs::remove_dir_all(&storage_dir).expect("remove storage dir");

    let err = pool.acquire().expect_err("database directory is gone");
    assert!(
        matches!(err, StoreError::ConnectFailed(_)),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.code(), "STORE_UNAVAILABLE");
    assert!(err.is_retryable());
    assert_eq!(pool.in_use(), 0, "slot must be released on a failed open");
}
