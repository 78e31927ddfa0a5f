//! Reactive substrate for optmodel.
//!
//! - [`Observable`]: a shared, versioned cell. Reads through [`Observable::get`]
//!   are recorded by the innermost tracking frame.
//! - [`ReadOnly`]: a read capability over an observable; it cannot write.
//! - [`Memo`]: a cached derivation that stays valid until any source read
//!   during its last computation changes version.
//!
//! # Invariants
//!
//! 1. A cell's version increases exactly once per write that changes its value.
//! 2. Writing a value equal to the current one is a no-op.
//! 3. `Memo` never returns a value computed from a source version that is no
//!    longer current.
//! 4. Tracking frames are per thread; a derivation only observes reads made on
//!    the thread that computes it.

#![forbid(unsafe_code)]

pub mod memo;
pub mod observable;
pub mod tracking;

pub use memo::Memo;
pub use observable::{Observable, ReadOnly, Source, SourceId};
pub use tracking::{track, untracked, Dep, Deps};
