//! Atomically swappable reference-counted pointers with deferred
//! reclamation.
//!
//! `defrc` provides [`Arc`]/[`Weak`] handles that live in [`AtomicArc`]/
//! [`AtomicWeak`] slots shared between threads. Any thread may load, store
//! or compare-exchange a slot without a lock; the destruction of a
//! displaced object is deferred through a safe-memory-reclamation backend
//! until no thread can still be dereferencing it.
//!
//! Two backends are provided and selected per pointer type:
//! [`AcquireRetire`], which protects individual pointers through
//! per-thread announcement slots, and [`Ebr`], which protects whole
//! read-side sections through a global epoch. The default is
//! `AcquireRetire`.
//!
//! ```
//! use defrc::AtomicArc;
//!
//! let slot = AtomicArc::new(Some(defrc::new(42)));
//!
//! let snapshot = slot.get_snapshot().unwrap();
//! assert_eq!(*snapshot, 42);
//!
//! slot.store(Some(defrc::new(43)));
//! // The snapshot still reads the object it protected.
//! assert_eq!(*snapshot, 42);
//! ```

mod backoff;
mod barrier;
mod cache_padded;
mod counter;
mod object;
mod ptr;
mod registry;
mod smr;

pub use ptr::{Arc, AtomicArc, AtomicWeak, Snapshot, StrongPtr, Weak, WeakSnapshot};
pub use smr::{AcquireRetire, ArProtect, Ebr, EbrProtect, Protected, RetireKind, Smr, Strength};

/// Allocates a new shared object behind the default backend.
pub fn new<T: Send + Sync + 'static>(value: T) -> Arc<T> {
    Arc::new(value)
}
