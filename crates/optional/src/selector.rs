//! The optional-model selector chain.
//!
//! A [`Selector`] binds a model source to zero, one or two projections. Which
//! projections are bound is part of the type:
//!
//! ```text
//! Selector<M, Unbound,     Unbound>      bare        no result
//! Selector<M, OnEmpty<ER>, Unbound>      empty-bound Option<ER>
//! Selector<M, Unbound,     OnFull<FR>>   full-bound  Option<FR>
//! Selector<M, OnEmpty<ER>, OnFull<FR>>   both-bound  Branch<ER, FR>
//! ```
//!
//! Binding a projection borrows the selector and returns a new one; the
//! original is left untouched. `on_empty(f).on_full(g)` and
//! `on_full(g).on_empty(f)` produce the same type.
//!
//! Internally every variant computes a `Branch<E::Out, F::Out>`, with an
//! unbound slot yielding [`NotApplicable`]. Each variant's `result()` maps that
//! branch to its public shape, so exactly one projection runs per evaluation.
//!
//! Projections are infallible. A projection that panics unwinds through
//! `result()` unchanged; one that wants to fail returns a `Result` as its
//! output and gets it back as-is.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use optmodel_core::{EntityType, Record, RepoError, Repository};
use optmodel_reactive::{untracked, Memo};
use tracing::trace;

use crate::kind::{OptionalSelector, SelectorFamily, SelectorTag, SelectorVariant};
use crate::oracle::{self, Full};
use crate::source::ModelSource;

/// Outcome of one evaluation: which side of the oracle the record fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch<E, F> {
    Empty(E),
    Full(F),
}

impl<E, F> Branch<E, F> {
    pub fn is_full(&self) -> bool { matches!(self, Branch::Full(_)) }
    pub fn is_empty(&self) -> bool { matches!(self, Branch::Empty(_)) }

    pub fn empty(self) -> Option<E> {
        match self {
            Branch::Empty(e) => Some(e),
            Branch::Full(_) => None,
        }
    }

    pub fn full(self) -> Option<F> {
        match self {
            Branch::Full(f) => Some(f),
            Branch::Empty(_) => None,
        }
    }
}

impl<T> Branch<T, T> {
    /// Collapse a branch whose sides share a type.
    pub fn into_inner(self) -> T {
        match self {
            Branch::Empty(v) | Branch::Full(v) => v,
        }
    }
}

/// Output of a slot with no projection bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NotApplicable;

/// Which completeness check a selector uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    #[default]
    Shallow,
    /// Follow link fields; see [`oracle::is_deeply_complete`].
    Deep,
}

mod sealed {
    pub trait Sealed {}
}

/// No projection bound in this slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Projection run when the record is not complete. Receives the record as-is.
pub struct OnEmpty<ER>(Rc<dyn Fn(&Record) -> ER>);

/// Projection run when the record is complete.
pub struct OnFull<FR>(Rc<dyn Fn(Full<'_>) -> FR>);

impl<ER> Clone for OnEmpty<ER> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

impl<FR> Clone for OnFull<FR> {
    fn clone(&self) -> Self { Self(Rc::clone(&self.0)) }
}

pub trait EmptySlot: sealed::Sealed + Clone {
    type Out: Clone;
    const BOUND: bool;
    fn project(&self, record: &Record) -> Self::Out;
}

pub trait FullSlot: sealed::Sealed + Clone {
    type Out: Clone;
    const BOUND: bool;
    fn project(&self, full: Full<'_>) -> Self::Out;
}

impl sealed::Sealed for Unbound {}
impl<ER> sealed::Sealed for OnEmpty<ER> {}
impl<FR> sealed::Sealed for OnFull<FR> {}

impl EmptySlot for Unbound {
    type Out = NotApplicable;
    const BOUND: bool = false;
    fn project(&self, _: &Record) -> NotApplicable { NotApplicable }
}

impl FullSlot for Unbound {
    type Out = NotApplicable;
    const BOUND: bool = false;
    fn project(&self, _: Full<'_>) -> NotApplicable { NotApplicable }
}

impl<ER: Clone> EmptySlot for OnEmpty<ER> {
    type Out = ER;
    const BOUND: bool = true;
    fn project(&self, record: &Record) -> ER { (self.0)(record) }
}

impl<FR: Clone> FullSlot for OnFull<FR> {
    type Out = FR;
    const BOUND: bool = true;
    fn project(&self, full: Full<'_>) -> FR { (self.0)(full) }
}

pub type BareSelector<M> = Selector<M, Unbound, Unbound>;
pub type EmptyBound<M, ER> = Selector<M, OnEmpty<ER>, Unbound>;
pub type FullBound<M, FR> = Selector<M, Unbound, OnFull<FR>>;
pub type BothBound<M, ER, FR> = Selector<M, OnEmpty<ER>, OnFull<FR>>;

/// Optional-model selector over a model source `M`.
pub struct Selector<M, E: EmptySlot = Unbound, F: FullSlot = Unbound> {
    model: M,
    model_type: EntityType,
    repo: Arc<dyn Repository>,
    mode: CheckMode,
    on_empty: E,
    on_full: F,
    memo: Memo<Branch<E::Out, F::Out>>,
}

impl<M: ModelSource> Selector<M> {
    pub fn new(model: M, model_type: EntityType, repo: Arc<dyn Repository>) -> Self {
        Self::assemble(model, model_type, repo, CheckMode::Shallow, Unbound, Unbound)
    }
}

impl<M: ModelSource, E: EmptySlot, F: FullSlot> Selector<M, E, F> {
    pub const VARIANT: SelectorVariant = SelectorVariant::from_bound(E::BOUND, F::BOUND);

    fn assemble(model: M, model_type: EntityType, repo: Arc<dyn Repository>, mode: CheckMode, on_empty: E, on_full: F) -> Self {
        Self { model, model_type, repo, mode, on_empty, on_full, memo: Memo::with_label("selector") }
    }

    fn rebind<E2: EmptySlot, F2: FullSlot>(&self, on_empty: E2, on_full: F2) -> Selector<M, E2, F2> {
        Selector::assemble(self.model.clone(), self.model_type.clone(), Arc::clone(&self.repo), self.mode, on_empty, on_full)
    }

    /// Same selector, judged by the deep (link-following) completeness check.
    pub fn deep(&self) -> Self {
        let mut next = self.rebind(self.on_empty.clone(), self.on_full.clone());
        next.mode = CheckMode::Deep;
        next
    }

    pub fn mode(&self) -> CheckMode { self.mode }

    /// The underlying source, for manual inspection.
    pub fn model(&self) -> &M { &self.model }

    pub fn model_type(&self) -> &EntityType { &self.model_type }

    pub fn repository(&self) -> &Arc<dyn Repository> { &self.repo }

    pub fn variant(&self) -> SelectorVariant { Self::VARIANT }

    /// Ask the oracle directly, without running any projection.
    pub fn is_complete(&self) -> Result<bool, RepoError> {
        let record = self.model.read();
        match self.mode {
            CheckMode::Shallow => oracle::is_complete(&record, &self.model_type, self.repo.as_ref()),
            CheckMode::Deep => oracle::is_deeply_complete(&record, &self.model_type, self.repo.as_ref()),
        }
    }

    /// Memo misses. Static selectors bypass the memo and always report zero.
    pub fn recomputations(&self) -> u64 { self.memo.recomputations() }

    fn evaluate(&self) -> Result<Branch<E::Out, F::Out>, RepoError> {
        match M::FAMILY {
            SelectorFamily::Observable => self.memo.try_get(|| self.dispatch()),
            SelectorFamily::Static => untracked(|| self.dispatch()),
        }
    }

    fn dispatch(&self) -> Result<Branch<E::Out, F::Out>, RepoError> {
        let record = self.model.read();
        let full = match self.mode {
            CheckMode::Shallow => oracle::check_full(&record, &self.model_type, self.repo.as_ref())?,
            CheckMode::Deep => oracle::check_full_deep(&record, &self.model_type, self.repo.as_ref())?,
        };
        let variant = Self::VARIANT;
        trace!(model_type = %self.model_type, id = %record.id, full = full.is_some(), ?variant, "dispatch");
        Ok(match full {
            Some(full) => Branch::Full(self.on_full.project(full)),
            None => Branch::Empty(self.on_empty.project(&record)),
        })
    }
}

impl<M: ModelSource, F: FullSlot> Selector<M, Unbound, F> {
    /// Bind the projection used while the record is incomplete.
    pub fn on_empty<ER: Clone + 'static>(&self, callback: impl Fn(&Record) -> ER + 'static) -> Selector<M, OnEmpty<ER>, F> {
        self.rebind(OnEmpty(Rc::new(callback)), self.on_full.clone())
    }
}

impl<M: ModelSource, E: EmptySlot> Selector<M, E, Unbound> {
    /// Bind the projection used once the record is complete.
    pub fn on_full<FR: Clone + 'static>(&self, callback: impl Fn(Full<'_>) -> FR + 'static) -> Selector<M, E, OnFull<FR>> {
        self.rebind(self.on_empty.clone(), OnFull(Rc::new(callback)))
    }
}

impl<M: ModelSource, ER: Clone> Selector<M, OnEmpty<ER>, Unbound> {
    /// `Some(on_empty(record))` while incomplete; `None` once complete.
    pub fn result(&self) -> Result<Option<ER>, RepoError> { Ok(self.evaluate()?.empty()) }
}

impl<M: ModelSource, FR: Clone> Selector<M, Unbound, OnFull<FR>> {
    /// `Some(on_full(record))` when complete; `None` while incomplete.
    pub fn result(&self) -> Result<Option<FR>, RepoError> { Ok(self.evaluate()?.full()) }
}

impl<M: ModelSource, ER: Clone, FR: Clone> Selector<M, OnEmpty<ER>, OnFull<FR>> {
    /// Output of exactly one of the two projections.
    pub fn result(&self) -> Result<Branch<ER, FR>, RepoError> { self.evaluate() }
}

impl<M: ModelSource, E: EmptySlot, F: FullSlot> OptionalSelector for Selector<M, E, F> {
    fn tag(&self) -> SelectorTag { SelectorTag { family: M::FAMILY, variant: Self::VARIANT } }
    fn model_type(&self) -> &EntityType { &self.model_type }
    fn repository(&self) -> &Arc<dyn Repository> { &self.repo }
    fn current(&self) -> Arc<Record> { self.model.read() }
}

impl<M, E: EmptySlot, F: FullSlot> fmt::Debug for Selector<M, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("model_type", &self.model_type)
            .field("empty_bound", &E::BOUND)
            .field("full_bound", &F::BOUND)
            .field("mode", &self.mode)
            .field("memo", &self.memo)
            .finish()
    }
}
