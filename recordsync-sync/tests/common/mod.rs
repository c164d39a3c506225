//! Shared test helpers for sync tests.

#![allow(dead_code)]

use recordsync_storage::Database;
use recordsync_sync::remote::mock::InMemoryRemote;
use recordsync_sync::{SyncConfig, SyncRuntime};
use recordsync_types::{into_fields, Fields};
use serde_json::Value;
use std::sync::Arc;

/// A runtime wired to an in-memory database and an in-memory remote.
/// Background tasks are not started.
pub struct Harness {
    pub remote: Arc<InMemoryRemote>,
    pub runtime: SyncRuntime,
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        drain_grace_ms: 0,
        settle_delay_ms: 0,
        probe_interval_ms: 50,
        push_reconnect_delay_ms: 10,
        push_max_reconnect_attempts: 1,
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(Database::open_in_memory().unwrap())
}

pub fn harness_with(db: Database) -> Harness {
    let remote = Arc::new(InMemoryRemote::new());
    let runtime = SyncRuntime::with_parts(test_config(), db, remote.clone()).unwrap();
    Harness { remote, runtime }
}

impl Harness {
    /// Brings the remote up and confirms it with a probe.
    pub async fn go_online(&self) {
        self.remote.set_online(true);
        assert!(self.runtime.reachability().probe_now().await);
    }

    /// Takes the remote down and drops reachability.
    pub fn go_offline(&self) {
        self.remote.set_online(false);
        self.runtime.reachability().report_remote_failure();
    }

    pub fn pending(&self) -> usize {
        self.runtime.queue().len().unwrap()
    }
}

pub fn fields(value: Value) -> Fields {
    into_fields(value).unwrap()
}
