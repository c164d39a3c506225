//! Error types for the sync layer.

use recordsync_storage::StorageError;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The record does not exist in the local cache.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Durable storage rejected a write; in-memory state may be ahead of disk.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// Durable storage could not be opened or read at all.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The remote authority rejected the request (4xx other than not-found).
    #[error("remote rejected request: {0}")]
    RemoteValidation(RemoteError),

    /// The remote authority could not be reached or failed (5xx, timeout).
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(RemoteError),

    /// A record failed to parse.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] recordsync_types::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.classify() {
            RemoteErrorKind::Unavailable => Self::RemoteUnavailable(err),
            RemoteErrorKind::NotFound | RemoteErrorKind::Validation => {
                Self::RemoteValidation(err)
            }
        }
    }
}

impl SyncError {
    /// Whether a queued operation that failed with this error should stay queued.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteValidation(_) | Self::NotFound(_) | Self::InvalidRecord(_) => false,
            Self::RemoteUnavailable(_)
            | Self::Persistence(_)
            | Self::StorageUnavailable(_)
            | Self::Serialization(_)
            | Self::Config(_)
            | Self::TaskFailed(_) => true,
        }
    }

    /// Maps this error to the plain-language category shown to users.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::RemoteUnavailable(_) => ErrorCategory::Connectivity,
            Self::RemoteValidation(remote) => match remote.status {
                Some(401) | Some(403) => ErrorCategory::Permission,
                Some(404) => ErrorCategory::NotFound,
                _ => ErrorCategory::InvalidInput,
            },
            Self::InvalidRecord(_) => ErrorCategory::InvalidInput,
            _ => ErrorCategory::Generic,
        }
    }

    /// The user-facing message for this error. Never includes raw error text.
    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }
}

/// Plain-language error categories for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connectivity,
    NotFound,
    InvalidInput,
    Permission,
    Generic,
}

impl ErrorCategory {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Connectivity => {
                "You appear to be offline. Your changes are saved and will sync when the connection returns."
            }
            Self::NotFound => "That item no longer exists.",
            Self::InvalidInput => "Some of the information entered is not valid. Please check it and try again.",
            Self::Permission => "You don't have permission to do that.",
            Self::Generic => "Something went wrong. Please try again.",
        }
    }
}

/// How a remote failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 404: the target does not exist remotely.
    NotFound,
    /// Any other 4xx except 408/429: retrying will not help.
    Validation,
    /// 5xx, 408, 429, timeout or no response at all: worth retrying.
    Unavailable,
}

/// A normalized failure from the remote authority.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    /// Machine-readable message.
    pub message: String,
    /// Optional structured details from the response body.
    pub details: Option<Value>,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// A failure with no response: connection refused, DNS, timeout.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn classify(&self) -> RemoteErrorKind {
        match self.status {
            Some(404) => RemoteErrorKind::NotFound,
            Some(408) | Some(429) => RemoteErrorKind::Unavailable,
            Some(s) if (400..500).contains(&s) => RemoteErrorKind::Validation,
            _ => RemoteErrorKind::Unavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.classify() == RemoteErrorKind::NotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.classify() == RemoteErrorKind::Unavailable
    }

    /// No response arrived at all, so the remote itself is in doubt.
    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}
