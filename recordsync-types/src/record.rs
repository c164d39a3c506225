//! Records and their JSON wire shape.

use crate::{CanonicalId, Error, RecordId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names that carry an identifier and are never trusted from a client.
pub const IDENTIFIER_FIELDS: &[&str] = &["id", "_id", "localId", "local_id"];

/// Arbitrary record attributes.
pub type Fields = serde_json::Map<String, Value>;

/// Removes every identifier field from `fields`.
pub fn strip_identifiers(fields: &mut Fields) {
    for key in IDENTIFIER_FIELDS {
        fields.remove(*key);
    }
}

/// Converts a JSON object into [`Fields`], rejecting any other JSON type.
pub fn into_fields(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidRecord(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// A domain record: one active key plus attribute fields.
///
/// `fields` never contains identifier entries; the key lives in `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: Fields,
}

impl Record {
    /// Creates a record, dropping any identifier fields from `fields`.
    pub fn new(id: impl Into<RecordId>, mut fields: Fields) -> Self {
        strip_identifiers(&mut fields);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Creates a record under a freshly generated local identifier.
    pub fn draft(fields: Fields) -> Self {
        Self::new(RecordId::new_local(), fields)
    }

    /// Parses a record as returned by the remote authority.
    ///
    /// The identifier comes from `id` (string or number), falling back to `_id`.
    pub fn from_remote(value: Value) -> Result<Self> {
        let fields = into_fields(value)?;
        let id = ["id", "_id"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(identifier_string))
            .ok_or_else(|| Error::InvalidRecord("remote record has no identifier".into()))?;
        Ok(Self::new(CanonicalId::new(id), fields))
    }

    /// Returns the canonical identifier, if the remote authority assigned one.
    #[must_use]
    pub fn canonical_id(&self) -> Option<&CanonicalId> {
        self.id.canonical()
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

fn identifier_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
