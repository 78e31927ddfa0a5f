//! Variant tags for selectors of unknown concrete type.

use std::sync::Arc;

use optmodel_core::{EntityType, Record, Repository};
use serde::{Deserialize, Serialize};

/// Which projections a selector has bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorVariant {
    Bare,
    EmptyBound,
    FullBound,
    BothBound,
}

impl SelectorVariant {
    pub const fn from_bound(empty: bool, full: bool) -> Self {
        match (empty, full) {
            (false, false) => SelectorVariant::Bare,
            (true, false) => SelectorVariant::EmptyBound,
            (false, true) => SelectorVariant::FullBound,
            (true, true) => SelectorVariant::BothBound,
        }
    }

    /// Bare selectors expose no result.
    pub fn has_result(self) -> bool { !matches!(self, SelectorVariant::Bare) }
}

/// Observable selectors read a repository cell; static ones a frozen record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorFamily {
    Observable,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorTag {
    pub family: SelectorFamily,
    pub variant: SelectorVariant,
}

/// Object-safe view shared by every selector, whatever its bound callbacks.
pub trait OptionalSelector {
    fn tag(&self) -> SelectorTag;
    fn model_type(&self) -> &EntityType;
    fn repository(&self) -> &Arc<dyn Repository>;
    /// Current record, bypassing projections.
    fn current(&self) -> Arc<Record>;
}

/// True for all four observable variants; false for static selectors.
pub fn is_observable_selector(selector: &dyn OptionalSelector) -> bool {
    observable_variant(selector).is_some()
}

pub fn observable_variant(selector: &dyn OptionalSelector) -> Option<SelectorVariant> {
    match selector.tag() {
        SelectorTag { family: SelectorFamily::Observable, variant } => Some(variant),
        SelectorTag { family: SelectorFamily::Static, .. } => None,
    }
}
