//! Core type definitions for recordsync.
//!
//! This crate defines the plain data shared by the storage and sync layers:
//! - Record identifiers (client-side local IDs and remote canonical IDs)
//! - Records with arbitrary JSON attribute fields
//! - Queued write operations and their monotonic enqueue timestamps
//! - Derived status values broadcast to observers
//!
//! Nothing here performs I/O.

mod ids;
mod operation;
mod record;
mod status;
mod timestamp;

pub use ids::{CanonicalId, LocalId, RecordId};
pub use operation::{FailedOperation, OperationId, OperationKind, OperationPayload, QueueOperation};
pub use record::{into_fields, strip_identifiers, Fields, Record, IDENTIFIER_FIELDS};
pub use status::{ReachabilityState, SyncStatus};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown operation kind: {0}")]
    UnknownOperationKind(String),
}
