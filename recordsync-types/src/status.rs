//! Derived status values broadcast to observers. Never persisted.

use serde::{Deserialize, Serialize};

/// Progress of the sync engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub pending_operation_count: usize,
}

/// Transport connectivity combined with confirmed remote liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityState {
    pub transport_online: bool,
    pub remote_reachable: bool,
}

impl ReachabilityState {
    /// Effective reachability: both flags must hold.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.transport_online && self.remote_reachable
    }
}
