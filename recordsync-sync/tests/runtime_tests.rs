mod common;

use common::{fields, harness, test_config};
use recordsync_sync::{PushState, SyncConfig, SyncError, SyncRuntime};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn init_creates_database_and_validates_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sync.db");
    let config = SyncConfig {
        database_path: path.clone(),
        ..test_config()
    };

    let runtime = SyncRuntime::init(config).unwrap();
    assert!(path.exists());
    assert!(runtime.cache().get_all().await.unwrap().is_empty());

    let bad = SyncConfig {
        remote_base_url: String::new(),
        database_path: dir.path().join("other.db"),
        ..test_config()
    };
    assert!(matches!(SyncRuntime::init(bad), Err(SyncError::Config(_))));
}

#[tokio::test]
async fn started_runtime_drains_queue_once_remote_is_reachable() {
    let h = harness();
    h.remote.set_online(false);
    h.runtime.cache().add(fields(json!({"title": "X"}))).await.unwrap();
    assert_eq!(h.pending(), 1);

    h.runtime.start();
    h.runtime.start();
    h.remote.set_online(true);

    for _ in 0..300 {
        if h.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.pending(), 0);
    assert!(h.runtime.reachability().is_online());
    let local = h.runtime.cache().get_all().await.unwrap();
    assert_eq!(local, h.remote.records());

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn outage_seen_by_a_direct_write_is_drained_on_recovery() {
    let h = harness();
    h.runtime.start();
    let mut watch = h.runtime.reachability().watch();
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| s.is_online()))
        .await
        .unwrap()
        .unwrap();

    h.remote.set_online(false);
    h.runtime.cache().add(fields(json!({"title": "X"}))).await.unwrap();
    assert_eq!(h.pending(), 1);
    assert!(!h.runtime.reachability().is_online());

    h.remote.set_online(true);
    for _ in 0..300 {
        if h.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(h.pending(), 0);
    assert_eq!(h.remote.records().len(), 1);
    assert_eq!(h.runtime.cache().get_all().await.unwrap(), h.remote.records());

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn push_channel_gives_up_without_a_feed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let h = harness();
    let config = SyncConfig {
        push_url: Some(format!("ws://{addr}/changes")),
        ..test_config()
    };
    let runtime = SyncRuntime::with_parts(
        config,
        recordsync_storage::Database::open_in_memory().unwrap(),
        h.remote.clone(),
    )
    .unwrap();
    let mut watch = runtime.push().watch();

    runtime.start();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| *s == PushState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    runtime.shutdown().await;
}
