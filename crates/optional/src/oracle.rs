//! Completeness oracle: is a record a fully loaded instance of its type?
//!
//! The shallow check is the default everywhere. The deep check follows link
//! fields through the repository and is only used when asked for by name.

use std::ops::Deref;

use metrics::counter;
use optmodel_core::{EntityType, ModelKey, Record, RepoError, Repository};
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;

/// Ask the repository whether `record` is complete under `model_type`.
/// Repository errors (e.g. an unknown type) are returned, never read as "incomplete".
pub fn is_complete(record: &Record, model_type: &EntityType, repo: &dyn Repository) -> Result<bool, RepoError> {
    counter!("oracle_checks_total", 1u64, "mode" => "shallow");
    repo.is_full_model(record, model_type)
}

/// Shallow check returning a [`Full`] witness on success.
pub fn check_full<'a>(
    record: &'a Record,
    model_type: &'a EntityType,
    repo: &dyn Repository,
) -> Result<Option<Full<'a>>, RepoError> {
    Ok(is_complete(record, model_type, repo)?.then_some(Full { record, model_type }))
}

/// Deep check: the record and every entity reachable through its link fields
/// must be complete. Cycles are cut by a visited set keyed by `(type, id)`; an
/// entity already on the path counts as complete for that path.
pub fn is_deeply_complete(record: &Record, model_type: &EntityType, repo: &dyn Repository) -> Result<bool, RepoError> {
    counter!("oracle_checks_total", 1u64, "mode" => "deep");
    let mut visited = FxHashSet::default();
    deep(record, model_type, repo, &mut visited)
}

/// Deep variant of [`check_full`].
pub fn check_full_deep<'a>(
    record: &'a Record,
    model_type: &'a EntityType,
    repo: &dyn Repository,
) -> Result<Option<Full<'a>>, RepoError> {
    Ok(is_deeply_complete(record, model_type, repo)?.then_some(Full { record, model_type }))
}

fn deep(
    record: &Record,
    model_type: &EntityType,
    repo: &dyn Repository,
    visited: &mut FxHashSet<ModelKey>,
) -> Result<bool, RepoError> {
    visited.insert(ModelKey::new(model_type.clone(), record.id.clone()));
    if !repo.is_full_model(record, model_type)? {
        return Ok(false);
    }
    for link in repo.links(model_type)? {
        let id = match record.link_id(&link.field) {
            Some(id) => id,
            // presence and nullability were settled by the shallow check
            None if matches!(record.get(&link.field), None | Some(serde_json::Value::Null)) => continue,
            None => return Ok(false),
        };
        let key = ModelKey::new(link.sub_type.clone(), id);
        if visited.contains(&key) {
            continue;
        }
        let linked = repo.resolve(&key.model_type, &key.id)?;
        if !deep(&linked, &link.sub_type, repo, visited)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A record the oracle has judged complete for `model_type`.
///
/// Only this module constructs it, so a full projection can rely on every
/// required field being present.
#[derive(Debug, Clone, Copy)]
pub struct Full<'a> {
    record: &'a Record,
    model_type: &'a EntityType,
}

impl<'a> Full<'a> {
    pub fn record(&self) -> &'a Record { self.record }
    pub fn model_type(&self) -> &'a EntityType { self.model_type }

    /// Deserialize the record (fields plus `id`) into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        let mut obj = self.record.fields.clone();
        obj.insert("id".to_string(), serde_json::Value::String(self.record.id.to_string()));
        serde_json::from_value(serde_json::Value::Object(obj))
    }
}

impl Deref for Full<'_> {
    type Target = Record;
    fn deref(&self) -> &Record { self.record }
}
