//! Runtime lifecycle.
//!
//! [`SyncRuntime`] owns one instance of every component and the background
//! tasks that drive them. Callers reach components through its accessors.

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::push::PushChannel;
use crate::reachability::ReachabilityMonitor;
use crate::remote::{HttpRemoteClient, RemoteClient};
use crate::status::StatusHub;
use recordsync_storage::{Database, OperationQueue};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::info;

/// All sync components wired together.
pub struct SyncRuntime {
    config: SyncConfig,
    queue: Arc<OperationQueue>,
    status: Arc<StatusHub>,
    cache: Arc<LocalCache>,
    reachability: Arc<ReachabilityMonitor>,
    engine: Arc<SyncEngine>,
    push: Arc<PushChannel>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncRuntime {
    /// Opens the database named in `config` and connects to the remote over HTTP.
    pub fn init(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let db = Database::open(&config.database_path)
            .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?;
        let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemoteClient::new(&config)?);
        Self::with_parts(config, db, remote)
    }

    /// Wires components over an already-open database and remote client.
    pub fn with_parts(
        config: SyncConfig,
        db: Database,
        remote: Arc<dyn RemoteClient>,
    ) -> SyncResult<Self> {
        let queue = Arc::new(
            db.queue()
                .map_err(|e| SyncError::StorageUnavailable(e.to_string()))?,
        );
        let status = Arc::new(StatusHub::new(queue.clone()));
        let reachability = Arc::new(ReachabilityMonitor::from_config(remote.clone(), &config));
        let cache = Arc::new(LocalCache::new(
            db.records(),
            queue.clone(),
            remote.clone(),
            reachability.clone(),
            status.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(
            cache.clone(),
            queue.clone(),
            remote,
            reachability.clone(),
            status.clone(),
            &config,
        ));
        let push = Arc::new(PushChannel::from_config(&config, cache.clone())?);

        Ok(Self {
            config,
            queue,
            status,
            cache,
            reachability,
            engine,
            push,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the probe loop, the reconnect sequence and the push channel.
    /// Calling it again while running does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.reachability.spawn());
        tasks.push(self.engine.spawn());
        tasks.push(self.push.spawn());

        let push = self.push.clone();
        let mut watch = self.reachability.watch();
        tasks.push(tokio::spawn(async move {
            while watch.changed().await.is_ok() {
                if watch.borrow_and_update().is_online() {
                    push.reconnect();
                }
            }
        }));
        info!("Sync runtime started against {}", self.config.remote_base_url);
    }

    /// Stops every background task and waits for them to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Sync runtime stopped");
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn reachability(&self) -> &Arc<ReachabilityMonitor> {
        &self.reachability
    }

    pub fn push(&self) -> &Arc<PushChannel> {
        &self.push
    }

    pub fn status(&self) -> &Arc<StatusHub> {
        &self.status
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }
}
