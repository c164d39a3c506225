//! Sync engine.
//!
//! Drains the operation queue against the remote authority and performs
//! reconciliation pulls. Draining is single-flight: a drain requested while
//! another is running returns immediately with an empty report.

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::observer::{Observers, Subscription};
use crate::reachability::ReachabilityMonitor;
use crate::remote::RemoteClient;
use crate::run_blocking;
use crate::status::StatusHub;
use recordsync_storage::OperationQueue;
use recordsync_types::{FailedOperation, OperationPayload, QueueOperation, Record, RecordId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub success: usize,
    pub failed: usize,
}

/// Orchestrates queue drains and reconciliation pulls.
pub struct SyncEngine {
    cache: Arc<LocalCache>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteClient>,
    reachability: Arc<ReachabilityMonitor>,
    status: Arc<StatusHub>,
    drain_lock: Mutex<()>,
    failures: Observers<FailedOperation>,
    drain_grace: Duration,
    settle_delay: Duration,
}

impl SyncEngine {
    pub fn new(
        cache: Arc<LocalCache>,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteClient>,
        reachability: Arc<ReachabilityMonitor>,
        status: Arc<StatusHub>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            remote,
            reachability,
            status,
            drain_lock: Mutex::new(()),
            failures: Observers::new(),
            drain_grace: config.drain_grace(),
            settle_delay: config.settle_delay(),
        }
    }

    /// Replays queued operations against the remote authority, oldest first.
    ///
    /// Does nothing when the remote is unreachable (after one grace re-check)
    /// or when another drain is already running. Errors are never returned;
    /// they are logged, and non-retryable drops become failure notices.
    pub async fn sync_pending_operations(&self) -> SyncReport {
        if !self.reachability.is_online() {
            if !self.drain_grace.is_zero() {
                tokio::time::sleep(self.drain_grace).await;
            }
            if !self.reachability.is_online() {
                debug!("Remote unreachable; skipping drain");
                return SyncReport::default();
            }
        }

        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress");
            return SyncReport::default();
        };

        self.status.set_syncing(true);
        self.status.publish().await;

        let report = self.drain().await;

        self.status.set_syncing(false);
        self.status.publish().await;
        if report != SyncReport::default() {
            info!(
                "Drain finished: {} succeeded, {} failed",
                report.success, report.failed
            );
        }
        report
    }

    async fn drain(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let queue = self.queue.clone();
        let ops = match run_blocking(move || queue.get_all()).await {
            Ok(ops) => ops,
            Err(e) => {
                error!("Failed to read operation queue: {}", e);
                return report;
            }
        };
        if ops.is_empty() {
            return report;
        }
        debug!("Draining {} operations", ops.len());

        // Records whose earlier operation failed retryably in this pass.
        let mut blocked: HashSet<RecordId> = HashSet::new();
        let total = ops.len();

        for (index, op) in ops.into_iter().enumerate() {
            if !self.reachability.is_online() {
                info!(
                    "Reachability lost; leaving {} operations queued",
                    total - index
                );
                break;
            }

            let queue = self.queue.clone();
            let op_id = op.id;
            match run_blocking(move || queue.contains(op_id)).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Operation {} was withdrawn", op.id);
                    continue;
                }
                Err(e) => warn!("Failed to check operation {}: {}", op.id, e),
            }

            let key = target(&op.payload);
            if blocked.contains(&key) {
                continue;
            }

            let queue = self.queue.clone();
            if let Err(e) = run_blocking(move || queue.increment_attempts(op_id)).await {
                warn!("Failed to record attempt for operation {}: {}", op.id, e);
            }

            match self.dispatch(&op).await {
                Ok(()) => {
                    self.dequeue(&op).await;
                    report.success += 1;
                }
                Err(err) if err.is_retryable() => {
                    debug!("Operation {} will be retried: {}", op.id, err);
                    if let SyncError::RemoteUnavailable(remote) = &err
                        && remote.is_transport()
                    {
                        self.reachability.report_remote_failure();
                    }
                    blocked.insert(key);
                    report.failed += 1;
                }
                Err(err) => {
                    self.drop_operation(&op, &err).await;
                    report.failed += 1;
                }
            }

            self.status.publish().await;
        }

        report
    }

    async fn dispatch(&self, op: &QueueOperation) -> SyncResult<()> {
        match &op.payload {
            OperationPayload::Create { local_id, fields } => {
                // Send whatever the record holds now; the captured payload
                // only matters once the record is gone locally.
                let current = self
                    .cache
                    .find(&RecordId::Local(*local_id))
                    .await?
                    .map(|record| record.fields)
                    .unwrap_or_else(|| fields.clone());

                let confirmed = self.remote.create(&current).await?;
                debug!("Created {} as {}", local_id, confirmed.id);
                // The remote holds the record now, so the create is done even
                // if it cannot be applied locally; the next pull replaces the
                // row still keyed by `local_id`.
                if let Err(e) = self.cache.confirm_create(*local_id, &current, confirmed).await {
                    warn!(
                        "Created {} remotely but could not apply it locally: {}",
                        local_id, e
                    );
                }
                Ok(())
            }
            OperationPayload::Update { id, fields } => {
                self.remote.update(id, fields).await?;
                Ok(())
            }
            OperationPayload::Delete { id } => {
                // Already-deleted is the end state the operation wanted.
                self.remote.delete(id).await?;
                Ok(())
            }
        }
    }

    async fn dequeue(&self, op: &QueueOperation) {
        let queue = self.queue.clone();
        let op_id = op.id;
        if let Err(e) = run_blocking(move || queue.dequeue(op_id)).await {
            error!("Failed to dequeue completed operation {}: {}", op.id, e);
        }
    }

    async fn drop_operation(&self, op: &QueueOperation, err: &SyncError) {
        warn!(
            "Dropping {} operation {} after non-retryable failure: {}",
            op.kind(),
            op.id,
            err
        );

        let queue = self.queue.clone();
        let failed = op.clone();
        let message = err.to_string();
        match run_blocking(move || queue.record_failure(&failed, &message)).await {
            Ok(notice) => {
                self.failures.notify(&notice);
            }
            Err(e) => error!("Failed to record failure notice for {}: {}", op.id, e),
        }
        self.dequeue(op).await;
    }

    /// Replaces the local record set with the remote authority's snapshot.
    pub async fn sync_from_server(&self) -> SyncResult<Vec<Record>> {
        let records = self.remote.list().await?;
        self.cache.replace_all(records).await
    }

    /// Pushes local intents, waits for the remote to settle, then pulls.
    pub async fn reconcile(&self) -> SyncResult<SyncReport> {
        let report = self.sync_pending_operations().await;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        self.sync_from_server().await?;
        Ok(report)
    }

    /// Runs [`reconcile`](Self::reconcile) every time the remote becomes reachable.
    pub async fn run(self: Arc<Self>) {
        let mut watch = self.reachability.watch();
        let mut was_online = watch.borrow_and_update().is_online();
        if was_online {
            self.reconcile_logged().await;
        }

        while watch.changed().await.is_ok() {
            let online = watch.borrow_and_update().is_online();
            if online && !was_online {
                info!("Remote reachable; reconciling");
                self.reconcile_logged().await;
            }
            was_online = online;
        }
    }

    /// Spawns the reconnect loop onto the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    async fn reconcile_logged(&self) {
        if let Err(e) = self.reconcile().await {
            warn!("Reconciliation pull failed: {}", e);
        }
    }

    // ── Failure notices ──────────────────────────────────────────

    /// Operations dropped as non-retryable and not yet dismissed.
    pub async fn failed_operations(&self) -> SyncResult<Vec<FailedOperation>> {
        let queue = self.queue.clone();
        run_blocking(move || queue.failures()).await
    }

    /// Dismisses one failure notice. Returns whether it existed.
    pub async fn dismiss_failure(&self, id: i64) -> SyncResult<bool> {
        let queue = self.queue.clone();
        run_blocking(move || queue.dismiss_failure(id)).await
    }

    /// Registers a callback invoked whenever an operation is dropped.
    pub fn subscribe_failures(
        &self,
        callback: impl Fn(&FailedOperation) + Send + Sync + 'static,
    ) -> Subscription {
        self.failures.subscribe(callback)
    }
}

/// The cache key an operation targets.
fn target(payload: &OperationPayload) -> RecordId {
    match payload {
        OperationPayload::Create { local_id, .. } => RecordId::Local(*local_id),
        OperationPayload::Update { id, .. } | OperationPayload::Delete { id } => {
            RecordId::Canonical(id.clone())
        }
    }
}
