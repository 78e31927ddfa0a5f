//! Memoized derivations.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;

use metrics::counter;
use tracing::trace;

use crate::tracking::{self, Deps};

struct Cached<T> {
    value: T,
    deps: Deps,
}

/// Cache for a derived value, keyed by the versions of the sources the last
/// computation read.
///
/// The compute closure is passed on every read rather than stored, so the
/// owner can close over its own fields. A read inside another tracking frame
/// forwards this memo's dependencies to it, whether the value came from cache
/// or was recomputed.
pub struct Memo<T> {
    label: &'static str,
    slot: RefCell<Option<Cached<T>>>,
    recomputations: Cell<u64>,
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self { Self::with_label("memo") }

    /// `label` tags the `memo_recompute_total` counter.
    pub fn with_label(label: &'static str) -> Self {
        Self { label, slot: RefCell::new(None), recomputations: Cell::new(0) }
    }

    pub fn get(&self, compute: impl FnOnce() -> T) -> T {
        match self.try_get(|| Ok::<T, Infallible>(compute())) {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }

    /// Like [`Memo::get`] for fallible derivations. Errors are returned to the
    /// caller and never cached.
    pub fn try_get<E>(&self, compute: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        if let Some(cached) = self.slot.borrow().as_ref() {
            if !cached.deps.is_stale() {
                tracking::extend(&cached.deps);
                return Ok(cached.value.clone());
            }
        }

        let (out, deps) = tracking::track(compute);
        self.recomputations.set(self.recomputations.get() + 1);
        counter!("memo_recompute_total", 1u64, "memo" => self.label);
        trace!(memo = self.label, deps = deps.len(), ok = out.is_ok(), "recomputed");
        tracking::extend(&deps);

        match out {
            Ok(value) => {
                *self.slot.borrow_mut() = Some(Cached { value: value.clone(), deps });
                Ok(value)
            }
            Err(e) => {
                *self.slot.borrow_mut() = None;
                Err(e)
            }
        }
    }

    /// A cached value exists and none of its sources changed.
    pub fn is_fresh(&self) -> bool {
        self.slot.borrow().as_ref().map_or(false, |c| !c.deps.is_stale())
    }

    pub fn invalidate(&self) { *self.slot.borrow_mut() = None; }

    /// Number of times a compute closure actually ran.
    pub fn recomputations(&self) -> u64 { self.recomputations.get() }
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self { Self::new() }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("label", &self.label)
            .field("cached", &self.slot.borrow().is_some())
            .field("recomputations", &self.recomputations.get())
            .finish()
    }
}
