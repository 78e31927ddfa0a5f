//! optmodel schema: per-type field metadata deciding what "full" means.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use optmodel_core::{EntityType, LinkSpec, Record};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Link,
    Null,
}

fn default_required() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub types: SmallVec<[FieldKind; 2]>,
    /// Target type of a `link` field.
    #[serde(default, rename = "subType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<EntityType>,
    /// Required fields must be present for a record to count as full.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl FieldSpec {
    pub fn is_link(&self) -> bool { self.types.contains(&FieldKind::Link) }
    pub fn is_nullable(&self) -> bool { self.types.contains(&FieldKind::Null) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(rename = "type")]
    pub model_type: EntityType,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ModelMetadata {
    pub fn new(model_type: impl Into<EntityType>) -> Self {
        Self { model_type: model_type.into(), fields: BTreeMap::new() }
    }

    /// Builder helper used by tests and embedders.
    pub fn field(mut self, name: &str, types: &[FieldKind]) -> Self {
        self.fields.insert(name.to_string(), FieldSpec { types: types.iter().copied().collect(), sub_type: None, required: true });
        self
    }

    pub fn optional_field(mut self, name: &str, types: &[FieldKind]) -> Self {
        self.fields.insert(name.to_string(), FieldSpec { types: types.iter().copied().collect(), sub_type: None, required: false });
        self
    }

    pub fn link(mut self, name: &str, sub_type: impl Into<EntityType>, nullable: bool) -> Self {
        let mut types: SmallVec<[FieldKind; 2]> = SmallVec::new();
        types.push(FieldKind::Link);
        if nullable { types.push(FieldKind::Null); }
        self.fields.insert(name.to_string(), FieldSpec { types, sub_type: Some(sub_type.into()), required: true });
        self
    }

    /// Required fields absent from `record`, or `null` where null is not allowed.
    pub fn missing_fields<'a>(&'a self, record: &Record) -> Vec<&'a str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .filter(|(name, spec)| match record.get(name) {
                None => true,
                Some(serde_json::Value::Null) => !spec.is_nullable(),
                Some(_) => false,
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_full(&self, record: &Record) -> bool { self.missing_fields(record).is_empty() }

    pub fn links(&self) -> SmallVec<[LinkSpec; 4]> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.is_link())
            .filter_map(|(name, spec)| {
                spec.sub_type.clone().map(|sub_type| LinkSpec { field: name.clone(), sub_type, nullable: spec.is_nullable() })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    pub path: String,
    pub error: String,
}

/// On-disk form: `{ "types": [ { "type": "user", "fields": { ... } } ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    types: Vec<ModelMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    types: BTreeMap<EntityType, ModelMetadata>,
}

impl SchemaRegistry {
    pub fn new() -> Self { Self::default() }

    /// Insert or replace the metadata for its type.
    pub fn register(&mut self, meta: ModelMetadata) -> Option<ModelMetadata> {
        self.types.insert(meta.model_type.clone(), meta)
    }

    pub fn with(mut self, meta: ModelMetadata) -> Self {
        self.register(meta);
        self
    }

    pub fn get(&self, model_type: &EntityType) -> Option<&ModelMetadata> { self.types.get(model_type) }
    pub fn contains(&self, model_type: &EntityType) -> bool { self.types.contains_key(model_type) }
    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let file: SchemaFile = serde_json::from_str(s).context("parsing schema JSON")?;
        let mut reg = Self::new();
        for meta in file.types {
            if reg.contains(&meta.model_type) {
                return Err(anyhow!("duplicate schema for type {}", meta.model_type));
            }
            reg.register(meta);
        }
        let issues = reg.validate();
        if let Some(first) = issues.first() {
            return Err(anyhow!("invalid schema ({} issues): {}: {}", issues.len(), first.path, first.error));
        }
        debug!(types = reg.len(), "schema registry loaded");
        Ok(reg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading schema file {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("loading schema file {}", path.display()))
    }

    /// Structural problems: bad field names, links without a target, links to
    /// unregistered types. Empty on success.
    pub fn validate(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        for (ty, meta) in self.types.iter() {
            if &meta.model_type != ty {
                issues.push(SchemaIssue { path: ty.to_string(), error: format!("registered under {} but declares {}", ty, meta.model_type) });
            }
            for (name, spec) in meta.fields.iter() {
                let path = format!("{}.{}", ty, name);
                if !valid_field_name(name) {
                    issues.push(SchemaIssue { path: path.clone(), error: "invalid field name".into() });
                }
                if spec.types.is_empty() {
                    issues.push(SchemaIssue { path: path.clone(), error: "no types declared".into() });
                }
                match (&spec.sub_type, spec.is_link()) {
                    (None, true) => issues.push(SchemaIssue { path, error: "link field without subType".into() }),
                    (Some(sub), true) if !self.contains(sub) => {
                        issues.push(SchemaIssue { path, error: format!("link to unknown type {}", sub) })
                    }
                    (Some(_), false) => issues.push(SchemaIssue { path, error: "subType on a non-link field".into() }),
                    _ => {}
                }
            }
        }
        issues
    }
}

fn valid_field_name(name: &str) -> bool {
    if name.is_empty() || name == "id" || name == "type" { return false; }
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
