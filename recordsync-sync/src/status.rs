//! Derived sync status broadcast.

use crate::observer::{Observers, Subscription};
use crate::run_blocking;
use recordsync_storage::OperationQueue;
use recordsync_types::SyncStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Recomputes [`SyncStatus`] from the queue and the draining flag and
/// pushes it to observers. Nothing here is persisted.
pub struct StatusHub {
    queue: Arc<OperationQueue>,
    syncing: AtomicBool,
    last: Mutex<SyncStatus>,
    observers: Observers<SyncStatus>,
}

impl StatusHub {
    pub fn new(queue: Arc<OperationQueue>) -> Self {
        Self {
            queue,
            syncing: AtomicBool::new(false),
            last: Mutex::new(SyncStatus::default()),
            observers: Observers::new(),
        }
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::SeqCst);
    }

    /// Recounts pending operations and notifies observers.
    pub async fn publish(&self) -> SyncStatus {
        let queue = self.queue.clone();
        let pending = match run_blocking(move || queue.len()).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count pending operations: {}", e);
                self.current().pending_operation_count
            }
        };

        let status = SyncStatus {
            is_syncing: self.syncing.load(Ordering::SeqCst),
            pending_operation_count: pending,
        };
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = status;
        self.observers.notify(&status);
        status
    }

    /// The most recently published status.
    pub fn current(&self) -> SyncStatus {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback for status changes. The last published status
    /// is delivered immediately.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe_with_current(&self.current(), callback)
    }
}
