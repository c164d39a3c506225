//! Identifier types for records.
//!
//! Two regimes coexist: a [`LocalId`] generated on this device when a record
//! is created, and a [`CanonicalId`] assigned later by the remote authority.
//! A record is keyed by exactly one of them at any time, see [`RecordId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const LOCAL_PREFIX: &str = "local-";

/// Client-generated placeholder identifier.
/// Uses UUID v7 so local IDs sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Creates a new local ID with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a local ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LOCAL_PREFIX}{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(LOCAL_PREFIX).unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

/// Identifier assigned by the remote authority. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Wraps a remote-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CanonicalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The single active key of a record in the local cache.
///
/// Serializes as a plain string: local IDs carry a `local-` prefix,
/// anything else is treated as canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RecordId {
    /// Not yet confirmed by the remote authority.
    Local(LocalId),
    /// Confirmed by the remote authority.
    Canonical(CanonicalId),
}

impl RecordId {
    /// Generates a fresh local identifier.
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(LocalId::new())
    }

    /// Parses a stored key. Never fails: unrecognized strings are canonical.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if let Some(raw) = s.strip_prefix(LOCAL_PREFIX) {
            if let Ok(uuid) = Uuid::parse_str(raw) {
                return Self::Local(LocalId::from_uuid(uuid));
            }
        }
        Self::Canonical(CanonicalId::new(s))
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Returns the canonical ID, if this key is one.
    #[must_use]
    pub fn canonical(&self) -> Option<&CanonicalId> {
        match self {
            Self::Canonical(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Returns the local ID, if this key is one.
    #[must_use]
    pub fn local(&self) -> Option<LocalId> {
        match self {
            Self::Local(id) => Some(*id),
            Self::Canonical(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => id.fmt(f),
            Self::Canonical(id) => id.fmt(f),
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<LocalId> for RecordId {
    fn from(id: LocalId) -> Self {
        Self::Local(id)
    }
}

impl From<CanonicalId> for RecordId {
    fn from(id: CanonicalId) -> Self {
        Self::Canonical(id)
    }
}
