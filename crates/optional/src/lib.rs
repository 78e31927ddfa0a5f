//! Optional-model selectors over the optmodel repository.
//!
//! A referenced entity may be fully loaded or only a stub awaiting fetch.
//! Selectors let a consumer describe both cases once and read a single
//! `result()` that follows the entity as it fills in:
//!
//! ```ignore
//! let title = optional_model(&repo, "user".into(), "u1".into())?
//!     .on_empty(|stub| format!("loading:{}", stub.id))
//!     .on_full(|user| user.get_str("name").unwrap_or_default().to_string());
//! println!("{}", title.result()?.into_inner());
//! ```

#![forbid(unsafe_code)]

use std::sync::Arc;

use optmodel_core::{EntityType, ModelId, Record, RepoError, Repository};
use optmodel_store::{MainRepository, ObservableModel};

pub mod kind;
pub mod oracle;
pub mod selector;
pub mod source;

pub use kind::{is_observable_selector, observable_variant, OptionalSelector, SelectorFamily, SelectorTag, SelectorVariant};
pub use oracle::{check_full, check_full_deep, is_complete, is_deeply_complete, Full};
pub use selector::{
    BareSelector, BothBound, Branch, CheckMode, EmptyBound, EmptySlot, FullBound, FullSlot, NotApplicable, OnEmpty,
    OnFull, Selector, Unbound,
};
pub use source::{ModelSource, StaticModel};

/// Bare observable selector for `(model_type, id)`. The repository creates a
/// stub cell if the model has not been seen yet.
pub fn optional_model(
    repo: &Arc<MainRepository>,
    model_type: EntityType,
    id: ModelId,
) -> Result<BareSelector<ObservableModel>, RepoError> {
    let model = repo.observe(&model_type, &id)?;
    let handle: Arc<dyn Repository> = Arc::clone(repo) as Arc<dyn Repository>;
    Ok(Selector::new(model, model_type, handle))
}

/// Bare static selector over a record snapshot, judged by its own type.
pub fn static_model(repo: Arc<dyn Repository>, record: Record) -> BareSelector<StaticModel> {
    let model_type = record.model_type.clone();
    Selector::new(StaticModel::new(record), model_type, repo)
}
