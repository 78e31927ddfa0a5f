//! optmodel core types: identities, records, deltas and the repository seam.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Identity key of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for ModelId {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for ModelId {
    fn from(v: String) -> Self { Self(v) }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Tag naming the schema a record conforms to (e.g. `"user"`).
///
/// Types are registered at runtime from schema configuration, so this is an
/// open string tag rather than a compiled enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self { Self(name.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for EntityType {
    fn from(v: &str) -> Self { Self(v.to_string()) }
}

impl From<String> for EntityType {
    fn from(v: String) -> Self { Self(v) }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Cache key of a reactive cell: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub model_type: EntityType,
    pub id: ModelId,
}

impl ModelKey {
    pub fn new(model_type: EntityType, id: ModelId) -> Self { Self { model_type, id } }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_type, self.id)
    }
}

/// A cached entity: either a stub (identity only) or a populated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: ModelId,
    #[serde(rename = "type")]
    pub model_type: EntityType,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn stub(model_type: EntityType, id: ModelId) -> Self {
        Self { id, model_type, fields: serde_json::Map::new() }
    }

    /// Build a record from a raw JSON object. Identity keys (`id`, `type`) are
    /// taken from the arguments, not from the payload.
    pub fn from_raw(model_type: EntityType, id: ModelId, raw: &serde_json::Value) -> Result<Self, RepoError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| RepoError::InvalidRecord(format!("{}/{}: payload is not an object", model_type, id)))?;
        let mut fields = obj.clone();
        fields.remove("id");
        fields.remove("type");
        Ok(Self { id, model_type, fields })
    }

    pub fn key(&self) -> ModelKey { ModelKey::new(self.model_type.clone(), self.id.clone()) }

    /// True when nothing beyond identity is known.
    pub fn is_stub(&self) -> bool { self.fields.is_empty() }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> { self.fields.get(field) }

    pub fn get_str(&self, field: &str) -> Option<&str> { self.fields.get(field).and_then(|v| v.as_str()) }

    /// Id of the entity referenced by a link field. Links are stored either as
    /// a bare id (string or number) or as an embedded object carrying `id`.
    pub fn link_id(&self, field: &str) -> Option<ModelId> {
        match self.fields.get(field)? {
            serde_json::Value::String(s) => Some(ModelId::new(s.clone())),
            serde_json::Value::Number(n) => Some(ModelId::new(n.to_string())),
            serde_json::Value::Object(map) => match map.get("id")? {
                serde_json::Value::String(s) => Some(ModelId::new(s.clone())),
                serde_json::Value::Number(n) => Some(ModelId::new(n.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Fetch progress reported for a cell. Fetching itself happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    None,
    Pending,
    Done,
    Error(String),
}

/// Contents of a reactive model cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub record: Arc<Record>,
    pub load: LoadState,
}

impl ModelState {
    pub fn stub(model_type: EntityType, id: ModelId) -> Self {
        Self { record: Arc::new(Record::stub(model_type, id)), load: LoadState::None }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// `raw` is the fetched object; it replaces the cached fields.
    Applied,
    Pending,
    /// `raw.message` carries the failure text.
    Failed,
    /// Revert the cell to a stub.
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    #[serde(rename = "type")]
    pub model_type: EntityType,
    pub id: ModelId,
    pub kind: DeltaKind,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Delta {
    pub fn key(&self) -> ModelKey { ModelKey::new(self.model_type.clone(), self.id.clone()) }
}

/// A link field declared by a type's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub field: String,
    pub sub_type: EntityType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    #[error("unknown model type: {0}")]
    UnknownModelType(EntityType),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl RepoError {
    pub fn is_unknown_model_type(&self) -> bool { matches!(self, RepoError::UnknownModelType(_)) }
}

/// Capability the completeness oracle consults. Implementations own storage,
/// schema knowledge and reactive cells; callers only ask questions.
pub trait Repository: Send + Sync {
    /// Authoritative completeness judgment for `record` under `model_type`.
    fn is_full_model(&self, record: &Record, model_type: &EntityType) -> Result<bool, RepoError>;

    /// Current record for `(model_type, id)`. Reads must be tracked so that
    /// derived values invalidate when the record changes, including records
    /// that were absent at the time of the read.
    fn resolve(&self, model_type: &EntityType, id: &ModelId) -> Result<Arc<Record>, RepoError>;

    /// Link fields declared for `model_type`.
    fn links(&self, model_type: &EntityType) -> Result<SmallVec<[LinkSpec; 4]>, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_strips_identity_keys() {
        let raw = serde_json::json!({ "id": "u1", "type": "user", "name": "Ann" });
        let r = Record::from_raw("user".into(), "u1".into(), &raw).unwrap();
        assert_eq!(r.get_str("name"), Some("Ann"));
        assert!(r.get("id").is_none());
        assert!(!r.is_stub());
    }

    #[test]
    fn from_raw_rejects_non_objects() {
        let err = Record::from_raw("user".into(), "u1".into(), &serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, RepoError::InvalidRecord(_)));
    }

    #[test]
    fn link_id_accepts_bare_and_embedded_forms() {
        let raw = serde_json::json!({ "a": "t1", "b": { "id": "t2", "title": "x" }, "c": 7, "d": null });
        let r = Record::from_raw("post".into(), "p1".into(), &raw).unwrap();
        assert_eq!(r.link_id("a"), Some(ModelId::from("t1")));
        assert_eq!(r.link_id("b"), Some(ModelId::from("t2")));
        assert_eq!(r.link_id("c"), Some(ModelId::from("7")));
        assert_eq!(r.link_id("d"), None);
        assert_eq!(r.link_id("missing"), None);
    }

    #[test]
    fn delta_parses_from_fixture_json() {
        let d: Delta = serde_json::from_value(serde_json::json!({
            "type": "user", "id": "u1", "kind": "applied", "raw": { "name": "Ann" }
        }))
        .unwrap();
        assert_eq!(d.kind, DeltaKind::Applied);
        assert_eq!(d.key().to_string(), "user/u1");
    }
}
