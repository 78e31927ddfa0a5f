//! Where a selector reads its record from.

use std::sync::Arc;

use optmodel_core::{ModelState, Record};
use optmodel_reactive::ReadOnly;

use crate::kind::SelectorFamily;

mod sealed {
    pub trait Sealed {}
}

/// Record source of a selector. Closed: a repository cell or a frozen snapshot.
pub trait ModelSource: sealed::Sealed + Clone {
    const FAMILY: SelectorFamily;

    /// Current record. Reactive sources record the read in the active frame.
    fn read(&self) -> Arc<Record>;
}

impl sealed::Sealed for ReadOnly<ModelState> {}

impl ModelSource for ReadOnly<ModelState> {
    const FAMILY: SelectorFamily = SelectorFamily::Observable;

    fn read(&self) -> Arc<Record> { Arc::clone(&self.get().record) }
}

/// A record snapshot that never changes.
#[derive(Debug, Clone)]
pub struct StaticModel(Arc<Record>);

impl StaticModel {
    pub fn new(record: Record) -> Self { Self(Arc::new(record)) }
}

impl sealed::Sealed for StaticModel {}

impl ModelSource for StaticModel {
    const FAMILY: SelectorFamily = SelectorFamily::Static;

    fn read(&self) -> Arc<Record> { Arc::clone(&self.0) }
}
