//! Pending write intents held by the durable operation queue.

use crate::{CanonicalId, Error, Fields, LocalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Queue-assigned operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of write an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::UnknownOperationKind(other.to_string())),
        }
    }
}

/// What an operation sends to the remote authority.
///
/// A create is keyed by the record's local ID at enqueue time; updates and
/// deletes are keyed by canonical ID, since records without one never
/// produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OperationPayload {
    Create { local_id: LocalId, fields: Fields },
    Update { id: CanonicalId, fields: Fields },
    Delete { id: CanonicalId },
}

impl OperationPayload {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// A queued write intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOperation {
    pub id: OperationId,
    pub payload: OperationPayload,
    pub enqueued_at: Timestamp,
    pub attempts: u32,
}

impl QueueOperation {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }
}

/// An operation the drain dropped as non-retryable, kept until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    /// Ledger row ID, used to dismiss the notice.
    pub id: i64,
    pub operation: QueueOperation,
    /// Error message from the remote authority.
    pub error: String,
    /// Milliseconds since Unix epoch.
    pub failed_at: u64,
}
