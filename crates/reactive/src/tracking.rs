//! Thread-local dependency tracking.
//!
//! [`track`] opens a frame, runs a closure and returns every source read
//! inside it together with the version observed at read time.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::observable::{Source, SourceId};

/// One recorded read.
#[derive(Clone)]
pub struct Dep {
    source: Arc<dyn Source>,
    version: u64,
}

impl Dep {
    pub fn id(&self) -> SourceId { self.source.source_id() }
    pub fn seen_version(&self) -> u64 { self.version }
    pub fn is_current(&self) -> bool { self.source.version() == self.version }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep").field("id", &self.id()).field("version", &self.version).finish()
    }
}

/// Reads recorded by one frame, deduplicated by source id.
#[derive(Debug, Clone, Default)]
pub struct Deps(SmallVec<[Dep; 4]>);

impl Deps {
    /// True when any recorded source moved past the version seen.
    pub fn is_stale(&self) -> bool { self.0.iter().any(|d| !d.is_current()) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn contains(&self, id: SourceId) -> bool { self.0.iter().any(|d| d.id() == id) }
    pub fn iter(&self) -> impl Iterator<Item = &Dep> { self.0.iter() }

    fn push(&mut self, dep: Dep) {
        if !self.contains(dep.id()) {
            self.0.push(dep);
        }
    }
}

thread_local! {
    // `None` frames suspend tracking (see `untracked`).
    static FRAMES: RefCell<Vec<Option<Deps>>> = const { RefCell::new(Vec::new()) };
}

struct FrameGuard {
    popped: bool,
}

impl FrameGuard {
    fn open(frame: Option<Deps>) -> Self {
        FRAMES.with(|f| f.borrow_mut().push(frame));
        Self { popped: false }
    }

    fn close(mut self) -> Deps {
        self.popped = true;
        pop_frame()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        // unwinding out of a tracked closure must not leave its frame behind
        if !self.popped {
            let _ = pop_frame();
        }
    }
}

fn pop_frame() -> Deps { FRAMES.with(|f| f.borrow_mut().pop().flatten().unwrap_or_default()) }

/// Run `f` and collect the sources it read.
pub fn track<R>(f: impl FnOnce() -> R) -> (R, Deps) {
    let guard = FrameGuard::open(Some(Deps::default()));
    let out = f();
    (out, guard.close())
}

/// Run `f` without recording any of its reads in the enclosing frame.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let guard = FrameGuard::open(None);
    let out = f();
    let _ = guard.close();
    out
}

pub(crate) fn record<S: Source + 'static>(source: &Arc<S>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if let Some(Some(top)) = frames.last_mut() {
            if top.contains(source.source_id()) {
                return;
            }
            let version = source.version();
            let source: Arc<dyn Source> = source.clone();
            top.push(Dep { source, version });
        }
    });
}

/// Forward dependencies of a nested derivation to the enclosing frame.
pub(crate) fn extend(deps: &Deps) {
    if deps.is_empty() {
        return;
    }
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if let Some(Some(top)) = frames.last_mut() {
            for d in deps.iter() {
                top.push(d.clone());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observable;

    #[test]
    fn track_records_each_source_once() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let (sum, deps) = track(|| *a.get() + *a.get() + *b.get());
        assert_eq!(sum, 4);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(a.id()));
        assert!(deps.contains(b.id()));
        assert!(!deps.is_stale());
        assert!(deps.iter().all(|d| d.seen_version() == 0));
        a.set(5);
        assert!(deps.is_stale());
    }

    #[test]
    fn peek_and_untracked_reads_are_invisible() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let (_, deps) = track(|| {
            let _ = a.peek();
            untracked(|| b.get());
        });
        assert!(deps.is_empty());
    }

    #[test]
    fn nested_frames_do_not_leak_into_parent() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let (_, outer) = track(|| {
            let _ = a.get();
            let (_, inner) = track(|| b.get());
            assert!(inner.contains(b.id()));
        });
        assert!(outer.contains(a.id()));
        assert!(!outer.contains(b.id()));
    }

    #[test]
    fn panic_inside_track_pops_frame() {
        let a = Observable::new(1);
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            track(|| {
                let _ = a.get();
                panic!("projection failed");
            })
        }));
        assert!(caught.is_err());
        // no frame left open: a plain read outside track records nothing
        let (_, deps) = track(|| ());
        assert!(deps.is_empty());
        FRAMES.with(|f| assert!(f.borrow().is_empty()));
    }
}
