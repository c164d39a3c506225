//! Reachability monitor.
//!
//! Combines a transport-level online flag, fed by the host environment, with
//! an actively probed liveness check of the remote authority. Effective
//! reachability is the conjunction of both.

use crate::config::SyncConfig;
use crate::observer::{Observers, Subscription};
use crate::remote::RemoteClient;
use recordsync_types::ReachabilityState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Tracks whether the remote authority can currently be reached.
pub struct ReachabilityMonitor {
    remote: Arc<dyn RemoteClient>,
    probe_timeout: Duration,
    probe_interval: Duration,
    state: watch::Sender<ReachabilityState>,
    observers: Observers<bool>,
    wake: Notify,
}

impl ReachabilityMonitor {
    /// Creates a monitor that assumes the transport is up and the remote
    /// is not yet confirmed.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        probe_timeout: Duration,
        probe_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ReachabilityState {
            transport_online: true,
            remote_reachable: false,
        });
        Self {
            remote,
            probe_timeout,
            probe_interval,
            state,
            observers: Observers::new(),
            wake: Notify::new(),
        }
    }

    pub fn from_config(remote: Arc<dyn RemoteClient>, config: &SyncConfig) -> Self {
        Self::new(remote, config.probe_timeout(), config.probe_interval())
    }

    /// Current raw state.
    pub fn state(&self) -> ReachabilityState {
        *self.state.borrow()
    }

    /// Effective reachability: transport up and remote confirmed.
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<ReachabilityState> {
        self.state.subscribe()
    }

    /// Registers a callback for effective-state changes. The current state is
    /// delivered immediately.
    pub fn subscribe(&self, callback: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        self.observers
            .subscribe_with_current(&self.is_online(), callback)
    }

    /// Feeds a transport-level connectivity signal. Going offline also
    /// drops remote reachability; coming online triggers an immediate probe.
    pub fn set_transport_online(&self, online: bool) {
        self.update(|state| {
            state.transport_online = online;
            if !online {
                state.remote_reachable = false;
            }
        });
        if online {
            self.wake.notify_one();
        }
    }

    /// Marks the remote unreachable after a failed call and restarts probing.
    pub fn report_remote_failure(&self) {
        self.update(|state| state.remote_reachable = false);
        self.wake.notify_one();
    }

    /// Probes the remote once and records the result. A probe that does not
    /// finish within the probe timeout counts as a failure.
    pub async fn probe_now(&self) -> bool {
        if !self.state().transport_online {
            return false;
        }

        let reachable = match tokio::time::timeout(self.probe_timeout, self.remote.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Liveness probe timed out after {:?}", self.probe_timeout);
                false
            }
        };

        self.update(|state| {
            if state.transport_online {
                state.remote_reachable = reachable;
            }
        });
        self.is_online()
    }

    fn update(&self, change: impl FnOnce(&mut ReachabilityState)) {
        let mut flipped = None;
        self.state.send_if_modified(|state| {
            let before = *state;
            change(state);
            if before.is_online() != state.is_online() {
                flipped = Some(state.is_online());
            }
            before != *state
        });

        if let Some(online) = flipped {
            info!(
                "Remote authority is now {}",
                if online { "reachable" } else { "unreachable" }
            );
            self.observers.notify(&online);
        }
    }

    /// Probe loop: probes while the transport is up and the remote is not
    /// confirmed, once per interval, and sleeps otherwise until woken.
    pub async fn run(self: Arc<Self>) {
        loop {
            let state = self.state();
            if state.transport_online && !state.remote_reachable {
                self.probe_now().await;
            }

            let state = self.state();
            if state.transport_online && !state.remote_reachable {
                tokio::select! {
                    _ = tokio::time::sleep(self.probe_interval) => {}
                    _ = self.wake.notified() => {}
                }
            } else {
                self.wake.notified().await;
            }
        }
    }

    /// Spawns the probe loop onto the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }
}
