//! Push channel.
//!
//! A WebSocket subscription to the remote authority's change feed. Each
//! notification is an already-confirmed remote fact and is applied straight
//! to the local cache, bypassing the queue.

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use futures::StreamExt;
use recordsync_types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// What happened to the record in a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One message on the change feed:
/// `{"type": "created" | "updated" | "deleted", "record": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub record: Value,
}

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts are exhausted; waits for [`PushChannel::reconnect`].
    Failed,
}

/// Persistent change-feed subscription.
pub struct PushChannel {
    url: String,
    cache: Arc<LocalCache>,
    max_attempts: u32,
    reconnect_delay: Duration,
    state: watch::Sender<PushState>,
    restart: Notify,
}

impl PushChannel {
    pub fn new(
        url: impl Into<String>,
        cache: Arc<LocalCache>,
        max_attempts: u32,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(PushState::Disconnected);
        Self {
            url: url.into(),
            cache,
            max_attempts: max_attempts.max(1),
            reconnect_delay,
            state,
            restart: Notify::new(),
        }
    }

    pub fn from_config(config: &SyncConfig, cache: Arc<LocalCache>) -> SyncResult<Self> {
        Ok(Self::new(
            config.push_url()?,
            cache,
            config.push_max_reconnect_attempts,
            config.push_reconnect_delay(),
        ))
    }

    pub fn state(&self) -> PushState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<PushState> {
        self.state.subscribe()
    }

    /// Restarts a channel that gave up. No-op while it is still trying.
    pub fn reconnect(&self) {
        if self.state() == PushState::Failed {
            info!("Restarting push channel");
            self.restart.notify_one();
        }
    }

    /// Applies one notification to the cache.
    pub async fn apply(&self, notification: ChangeNotification) -> SyncResult<()> {
        let record = Record::from_remote(notification.record)?;
        match notification.kind {
            ChangeKind::Created | ChangeKind::Updated => {
                debug!("Push {:?} {}", notification.kind, record.id);
                self.cache.upsert(record).await
            }
            ChangeKind::Deleted => {
                let Some(id) = record.canonical_id() else {
                    return Ok(());
                };
                if !self.cache.evict(id).await? {
                    debug!("Push delete for unknown record {}", id);
                }
                Ok(())
            }
        }
    }

    /// Parses and applies one text frame.
    pub async fn handle_message(&self, text: &str) -> SyncResult<()> {
        let notification: ChangeNotification = serde_json::from_str(text)?;
        self.apply(notification).await
    }

    fn set_state(&self, state: PushState) {
        self.state.send_replace(state);
    }

    /// Connection loop. Reconnects after a fixed delay and gives up after
    /// `max_attempts` consecutive failed connects, until [`reconnect`](Self::reconnect).
    pub async fn run(self: Arc<Self>) {
        loop {
            let mut failures = 0;
            while failures < self.max_attempts {
                self.set_state(PushState::Connecting);
                match connect_async(self.url.as_str()).await {
                    Ok((mut stream, _response)) => {
                        failures = 0;
                        info!("Push channel connected to {}", self.url);
                        self.set_state(PushState::Connected);

                        while let Some(message) = stream.next().await {
                            match message {
                                Ok(Message::Text(text)) => {
                                    if let Err(e) = self.handle_message(text.as_str()).await {
                                        warn!("Ignoring push message: {}", e);
                                    }
                                }
                                Ok(Message::Close(_)) => break,
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("Push channel read error: {}", e);
                                    break;
                                }
                            }
                        }
                        info!("Push channel disconnected");
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(
                            "Push connect attempt {}/{} failed: {}",
                            failures, self.max_attempts, e
                        );
                    }
                }

                self.set_state(PushState::Disconnected);
                if failures < self.max_attempts {
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }

            warn!("Push channel gave up after {} attempts", self.max_attempts);
            self.set_state(PushState::Failed);
            self.restart.notified().await;
        }
    }

    /// Spawns the connection loop onto the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }
}
