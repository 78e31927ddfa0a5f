//! Versioned reactive cells.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::tracking;

pub type SourceId = u64;

/// Anything a derivation can depend on: identified, versioned.
pub trait Source: Send + Sync {
    fn source_id(&self) -> SourceId;
    fn version(&self) -> u64;
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

struct Cell<T> {
    id: SourceId,
    value: ArcSwap<T>,
    version: AtomicU64,
}

impl<T: Send + Sync> Source for Cell<T> {
    fn source_id(&self) -> SourceId { self.id }
    fn version(&self) -> u64 { self.version.load(Ordering::Acquire) }
}

/// Shared, versioned value. Clones share the same cell.
///
/// Writers must be serialized by whoever owns the cell; readers never block.
pub struct Observable<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self { Self { cell: Arc::clone(&self.cell) } }
}

impl<T: Send + Sync + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        let id = NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed);
        Self { cell: Arc::new(Cell { id, value: ArcSwap::from_pointee(value), version: AtomicU64::new(0) }) }
    }

    /// Current value; recorded as a dependency of the active tracking frame.
    pub fn get(&self) -> Arc<T> {
        // version is captured before the load so a racing write can only make
        // the recorded dependency look stale, never fresh
        tracking::record(&self.cell);
        self.cell.value.load_full()
    }

    /// Current value without registering a dependency.
    pub fn peek(&self) -> Arc<T> { self.cell.value.load_full() }

    pub fn version(&self) -> u64 { self.cell.version.load(Ordering::Acquire) }

    pub fn id(&self) -> SourceId { self.cell.id }

    /// Hand out a handle that can read but never write this cell.
    pub fn read_only(&self) -> ReadOnly<T> { ReadOnly { inner: self.clone() } }
}

impl<T: PartialEq + Send + Sync + 'static> Observable<T> {
    /// Replace the value. Returns `false` (and keeps the version) when the new
    /// value equals the current one.
    pub fn set(&self, value: T) -> bool {
        if **self.cell.value.load() == value {
            return false;
        }
        self.cell.value.store(Arc::new(value));
        self.cell.version.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.cell.value.load());
        self.set(next)
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.cell.id)
            .field("version", &self.cell.version.load(Ordering::Acquire))
            .finish()
    }
}

/// Read capability over an [`Observable`].
pub struct ReadOnly<T> {
    inner: Observable<T>,
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<T: Send + Sync + 'static> ReadOnly<T> {
    pub fn get(&self) -> Arc<T> { self.inner.get() }
    pub fn peek(&self) -> Arc<T> { self.inner.peek() }
    pub fn version(&self) -> u64 { self.inner.version() }
    pub fn id(&self) -> SourceId { self.inner.id() }
}

impl<T> fmt::Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&self.inner).finish()
    }
}
