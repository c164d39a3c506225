//! Local-first sync engine for recordsync.
//!
//! The pieces, leaves first:
//!
//! - [`remote`]: the remote authority seam and its HTTP and in-memory clients
//! - [`reachability`]: transport connectivity combined with a liveness probe
//! - [`cache`]: the local record snapshot with write-through and observers
//! - [`engine`]: queue draining, reconciliation pulls, failure notices
//! - [`push`]: the WebSocket change feed applied straight to the cache
//! - [`runtime`]: owns and wires all of the above
//!
//! # Example
//!
//! ```no_run
//! use recordsync_sync::{SyncConfig, SyncRuntime};
//! use serde_json::json;
//!
//! # async fn demo() -> recordsync_sync::SyncResult<()> {
//! let runtime = SyncRuntime::init(SyncConfig::default())?;
//! runtime.start();
//!
//! let fields = json!({ "title": "X" }).as_object().cloned().unwrap_or_default();
//! let record = runtime.cache().add(fields).await?;
//! println!("created {}", record.id);
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod observer;
pub mod push;
pub mod reachability;
pub mod remote;
pub mod runtime;
pub mod status;

pub use cache::LocalCache;
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncReport};
pub use error::{ErrorCategory, RemoteError, RemoteErrorKind, SyncError, SyncResult};
pub use observer::{Observers, Subscription};
pub use push::{ChangeKind, ChangeNotification, PushChannel, PushState};
pub use reachability::ReachabilityMonitor;
pub use remote::{DeleteOutcome, HttpRemoteClient, RemoteClient, RemoteResult};
pub use runtime::SyncRuntime;
pub use status::StatusHub;

use recordsync_storage::StorageResult;

/// Runs a blocking storage call on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
        .map_err(SyncError::from)
}
