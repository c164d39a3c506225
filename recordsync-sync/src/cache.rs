//! Local cache store.
//!
//! The system of record for the UI: an in-memory snapshot backed by the
//! SQLite record table. Every mutation writes through to storage, updates the
//! snapshot and notifies observers while holding the snapshot lock, so no
//! observer or reader ever sees a half-applied change. Remote calls happen
//! after the lock is released.

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::observer::{Observers, Subscription};
use crate::reachability::ReachabilityMonitor;
use crate::remote::RemoteClient;
use crate::run_blocking;
use crate::status::StatusHub;
use recordsync_storage::{OperationQueue, RecordStore, StorageResult};
use recordsync_types::{
    CanonicalId, Fields, LocalId, OperationPayload, QueueOperation, Record, RecordId,
};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

type Snapshot = Option<Vec<Record>>;

/// Optimistic local record store.
pub struct LocalCache {
    store: RecordStore,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteClient>,
    reachability: Arc<ReachabilityMonitor>,
    status: Arc<StatusHub>,
    snapshot: Mutex<Snapshot>,
    observers: Observers<Vec<Record>>,
}

impl LocalCache {
    pub fn new(
        store: RecordStore,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteClient>,
        reachability: Arc<ReachabilityMonitor>,
        status: Arc<StatusHub>,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            reachability,
            status,
            snapshot: Mutex::new(None),
            observers: Observers::new(),
        }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Returns every record. The first call loads the snapshot from storage.
    pub async fn get_all(&self) -> SyncResult<Vec<Record>> {
        let mut guard = self.snapshot.lock().await;
        Ok(self.loaded(&mut guard).await?.clone())
    }

    /// Returns one record, or [`SyncError::NotFound`].
    pub async fn get_by_id(&self, id: &RecordId) -> SyncResult<Record> {
        self.find(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    /// Looks a record up in the snapshot, then in storage.
    pub async fn find(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        {
            let guard = self.snapshot.lock().await;
            if let Some(found) = guard
                .as_ref()
                .and_then(|records| records.iter().find(|r| &r.id == id))
            {
                return Ok(Some(found.clone()));
            }
        }

        let id = id.clone();
        self.persist(move |store| store.get(&id)).await
    }

    // ── User-originated writes ───────────────────────────────────

    /// Stores a new record under a fresh local identifier, then tries to
    /// create it remotely. A failed attempt is queued as a `create`.
    ///
    /// Observers have seen the local record before the remote attempt starts.
    pub async fn add(&self, fields: Fields) -> SyncResult<Record> {
        let local_id = LocalId::new();
        let record = Record::new(local_id, fields);

        {
            let mut guard = self.snapshot.lock().await;
            let records = self.loaded(&mut guard).await?;
            let stored = record.clone();
            self.persist(move |store| store.put(&stored)).await?;
            records.push(record.clone());
            self.observers.notify(records);
        }
        debug!("Added {}", record.id);

        let sent = record.fields.clone();
        match self.remote.create(&sent).await {
            Ok(confirmed) => self.confirm_create(local_id, &sent, confirmed).await,
            Err(e) => {
                debug!("Create of {} deferred: {}", record.id, e);
                self.remote_failed(&e);
                // Removed while the create was in flight: nothing to create.
                if self.find(&record.id).await?.is_none() {
                    return Ok(record);
                }
                self.enqueue(OperationPayload::Create {
                    local_id,
                    fields: sent,
                })
                .await?;
                Ok(record)
            }
        }
    }

    /// Replaces the fields of an existing record.
    ///
    /// A record without a canonical identifier is only updated locally; its
    /// pending create sends the latest fields when it drains.
    pub async fn update(&self, record: Record) -> SyncResult<Record> {
        let record = Record::new(record.id, record.fields);

        {
            let mut guard = self.snapshot.lock().await;
            let records = self.loaded(&mut guard).await?;
            let index = records
                .iter()
                .position(|r| r.id == record.id)
                .ok_or_else(|| SyncError::NotFound(record.id.to_string()))?;
            let stored = record.clone();
            self.persist(move |store| store.put(&stored)).await?;
            records[index] = record.clone();
            self.observers.notify(records);
        }

        if record.is_local() {
            debug!("Update of {} deferred until its create drains", record.id);
            return Ok(record);
        }
        self.push_update(&record).await?;
        Ok(record)
    }

    /// Deletes a record locally, then remotely if it ever reached the remote.
    pub async fn remove(&self, id: &RecordId) -> SyncResult<()> {
        {
            let mut guard = self.snapshot.lock().await;
            let records = self.loaded(&mut guard).await?;
            let index = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            let key = id.clone();
            self.persist(move |store| store.delete(&key)).await?;
            records.remove(index);
            self.observers.notify(records);
        }

        match id {
            RecordId::Local(local_id) => {
                let local_id = *local_id;
                let queue = self.queue.clone();
                let dropped = run_blocking(move || queue.remove_creates_for(local_id)).await?;
                if dropped > 0 {
                    debug!("Dropped {} pending create(s) for {}", dropped, id);
                    self.status.publish().await;
                }
                Ok(())
            }
            RecordId::Canonical(canonical) => {
                let payload = OperationPayload::Delete {
                    id: canonical.clone(),
                };
                if self.has_pending_for(canonical).await? {
                    self.enqueue(payload).await?;
                    return Ok(());
                }
                if let Err(e) = self.remote.delete(canonical).await {
                    debug!("Delete of {} deferred: {}", canonical, e);
                    self.remote_failed(&e);
                    self.enqueue(payload).await?;
                }
                Ok(())
            }
        }
    }

    // ── Remote-originated writes ─────────────────────────────────

    /// Inserts or replaces a record confirmed by the remote authority.
    /// Never touches the queue.
    pub async fn upsert(&self, record: Record) -> SyncResult<()> {
        let record = Record::new(record.id, record.fields);
        let mut guard = self.snapshot.lock().await;
        let records = self.loaded(&mut guard).await?;
        let stored = record.clone();
        self.persist(move |store| store.put(&stored)).await?;
        match records.iter().position(|r| r.id == record.id) {
            Some(index) => records[index] = record,
            None => records.push(record),
        }
        self.observers.notify(records);
        Ok(())
    }

    /// Re-keys a record from `old` to `new`, keeping its fields and position.
    /// A record already stored under `new` is replaced. Observers are
    /// notified once.
    ///
    /// Returns `None` if nothing is stored under `old`; the caller then
    /// upserts the confirmed record instead.
    pub async fn remap_identifier(
        &self,
        old: &RecordId,
        new: &CanonicalId,
    ) -> SyncResult<Option<Record>> {
        let new_key = RecordId::Canonical(new.clone());
        let mut guard = self.snapshot.lock().await;
        let records = self.loaded(&mut guard).await?;

        let (from, to) = (old.clone(), new_key.clone());
        let Some(remapped) = self.persist(move |store| store.remap(&from, &to)).await? else {
            return Ok(None);
        };

        if *old != new_key {
            records.retain(|r| r.id != new_key);
        }
        match records.iter().position(|r| &r.id == old) {
            Some(index) => records[index] = remapped.clone(),
            None => records.push(remapped.clone()),
        }
        self.observers.notify(records);
        debug!("Remapped {} -> {}", old, new);
        Ok(Some(remapped))
    }

    /// Removes a record the remote authority reports as deleted.
    /// Returns whether it was present.
    pub async fn evict(&self, id: &CanonicalId) -> SyncResult<bool> {
        let key = RecordId::Canonical(id.clone());
        let mut guard = self.snapshot.lock().await;
        let records = self.loaded(&mut guard).await?;
        let Some(index) = records.iter().position(|r| r.id == key) else {
            return Ok(false);
        };
        self.persist(move |store| store.delete(&key)).await?;
        records.remove(index);
        self.observers.notify(records);
        Ok(true)
    }

    /// Replaces the entire record set with `records` in one storage
    /// transaction and one notification. Returns the new snapshot.
    pub async fn replace_all(&self, records: Vec<Record>) -> SyncResult<Vec<Record>> {
        let records: Vec<Record> = records
            .into_iter()
            .map(|r| Record::new(r.id, r.fields))
            .collect();
        let mut guard = self.snapshot.lock().await;
        let stored = records.clone();
        self.persist(move |store| store.replace_all(&stored)).await?;
        self.observers.notify(&records);
        info!("Replaced local records with {} from remote", records.len());
        *guard = Some(records.clone());
        Ok(records)
    }

    // ── Snapshot control ─────────────────────────────────────────

    /// Drops the in-memory snapshot. The next read reloads from storage.
    pub async fn clear_cache(&self) {
        *self.snapshot.lock().await = None;
    }

    /// Destroys every record in storage and memory.
    pub async fn clear_all(&self) -> SyncResult<()> {
        let mut guard = self.snapshot.lock().await;
        self.persist(|store| store.clear()).await?;
        let records = Vec::new();
        self.observers.notify(&records);
        *guard = Some(records);
        Ok(())
    }

    /// Registers a callback invoked with the full snapshot after every mutation.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Vec<Record>) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }

    // ── Sync plumbing ────────────────────────────────────────────

    /// Applies a confirmed remote create to the record stored under
    /// `local_id`. If the record was edited after `sent` was captured, the
    /// newer fields are pushed as an update.
    pub(crate) async fn confirm_create(
        &self,
        local_id: LocalId,
        sent: &Fields,
        confirmed: Record,
    ) -> SyncResult<Record> {
        let Some(canonical) = confirmed.canonical_id().cloned() else {
            return Err(SyncError::InvalidRecord(recordsync_types::Error::InvalidRecord(
                format!("create of {local_id} confirmed without a canonical identifier"),
            )));
        };

        match self
            .remap_identifier(&RecordId::Local(local_id), &canonical)
            .await?
        {
            Some(remapped) => {
                if &remapped.fields != sent {
                    debug!("{} changed while its create was in flight", canonical);
                    self.push_update(&remapped).await?;
                }
                Ok(remapped)
            }
            None => {
                debug!("{} was deleted locally before its create confirmed", local_id);
                self.upsert(confirmed.clone()).await?;
                Ok(confirmed)
            }
        }
    }

    /// Sends an update for a canonical record, queueing it behind any
    /// pending operation for the same record or when the call fails.
    async fn push_update(&self, record: &Record) -> SyncResult<()> {
        let Some(id) = record.canonical_id() else {
            return Ok(());
        };
        let payload = OperationPayload::Update {
            id: id.clone(),
            fields: record.fields.clone(),
        };

        if self.has_pending_for(id).await? {
            self.enqueue(payload).await?;
            return Ok(());
        }
        if let Err(e) = self.remote.update(id, &record.fields).await {
            debug!("Update of {} deferred: {}", id, e);
            self.remote_failed(&e);
            self.enqueue(payload).await?;
        }
        Ok(())
    }

    /// A call that got no response at all puts the remote back under
    /// probing, so its recovery triggers a drain of what was queued here.
    fn remote_failed(&self, err: &RemoteError) {
        if err.is_transport() {
            self.reachability.report_remote_failure();
        }
    }

    async fn has_pending_for(&self, id: &CanonicalId) -> SyncResult<bool> {
        let queue = self.queue.clone();
        let id = id.clone();
        run_blocking(move || queue.has_pending_for(&id)).await
    }

    async fn enqueue(&self, payload: OperationPayload) -> SyncResult<QueueOperation> {
        let queue = self.queue.clone();
        let op = run_blocking(move || queue.enqueue(payload)).await;
        if let Err(e) = &op {
            warn!("Failed to queue operation; local change is unsynced: {}", e);
        }
        self.status.publish().await;
        op
    }

    async fn persist<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordStore) -> StorageResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        run_blocking(move || f(&store)).await
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Snapshot>,
    ) -> SyncResult<&'a mut Vec<Record>> {
        if guard.is_none() {
            let records = self
                .persist(|store| store.load_all())
                .await
                .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
            debug!("Loaded {} records from storage", records.len());
            **guard = Some(records);
        }
        Ok(guard.get_or_insert_with(Vec::new))
    }
}
