//! The memory-manager contract shared by all reclamation backends, plus the
//! count plumbing built on top of it.
//!
//! A backend's single job is to turn "this count must drop, but a reader
//! may be mid-dereference" into a deferred *retirement* and to *eject* the
//! retired action once no thread can still observe the pointer. Everything
//! else — what a strong or weak collapse means — lives here and in
//! [`crate::object`], identically for every backend.

mod acquire_retire;
mod ebr;

pub use acquire_retire::{AcquireRetire, ArProtect};
pub use ebr::{Ebr, EbrProtect};

use crate::object::{CountedObject, EjectAction, Header};
use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::AtomicUsize;

/// The deferred action a retirement stands for. The three kinds are
/// mutually exclusive for one pointer, so a single announcement protects
/// against all of them at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireKind {
    /// Drop one strong contribution.
    DecrementStrong,
    /// Drop one weak contribution.
    DecrementWeak,
    /// Run the payload destructor, then drop the implicit weak
    /// contribution. Queued when a strong collapse found live weak
    /// handles.
    Dispose,
}

/// Which counter a protection falls back onto when it has to own a
/// contribution instead of an announcement slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Strong,
    Weak,
}

/// A reclamation backend.
///
/// Backends are zero-sized type-level selectors over process-wide state;
/// every pointer type takes one as its `S` parameter.
///
/// # Safety
/// An implementation must guarantee that between handing out a
/// [`Protected`] for a pointer and its release, no retired action for that
/// pointer is ejected.
pub unsafe trait Smr: Sized + 'static {
    /// Backend-specific state backing one protected pointer.
    type ProtectState;

    /// Reads `slot`, guaranteeing the returned pointer cannot be reclaimed
    /// until the protection is released.
    fn acquire(slot: &AtomicUsize) -> Protected<Self>;

    /// Like [`acquire`](Smr::acquire), but an object whose `strength` count
    /// has already collapsed to zero is reported as null, so snapshots
    /// never observe a disposed-but-unfreed payload.
    fn protect_snapshot(slot: &AtomicUsize, strength: Strength) -> Protected<Self>;

    /// Protects `ptr` directly. The caller must hold an owning handle of
    /// the given `strength` for the pointer; no slot is read.
    fn reserve(ptr: *mut (), strength: Strength) -> Protected<Self>;

    /// Releases a protection token. Idempotence is not required; each token
    /// is released exactly once.
    fn release(state: &mut Self::ProtectState, ptr: *mut ());

    /// If `state` owns a count contribution of the given strength, neuter
    /// it and return true: the caller inherits the contribution. Lets a
    /// snapshot convert into an owning handle without touching the counter.
    fn steal_count(state: &mut Self::ProtectState, strength: Strength) -> bool;

    /// Defers `kind` for `ptr` until no thread can be mid-dereference.
    fn retire(ptr: *mut (), kind: RetireKind);

    /// Allocation hint; the epoch backend advances its clock off this.
    fn on_allocate() {}

    /// Ejects everything currently provable safe, including orphans left
    /// behind by exited threads. Drives tests and shutdown to quiescence.
    fn collect();
}

/// A pointer plus the backend protection keeping it alive. Transient;
/// long-lived views wrap its parts inside a snapshot handle.
pub struct Protected<S: Smr> {
    ptr: *mut (),
    state: S::ProtectState,
}

impl<S: Smr> Protected<S> {
    pub(crate) fn new(ptr: *mut (), state: S::ProtectState) -> Self {
        Self { ptr, state }
    }

    pub fn as_ptr(&self) -> *mut () {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Disassembles the handle without releasing the protection.
    pub(crate) fn into_parts(self) -> (*mut (), S::ProtectState) {
        let this = ManuallyDrop::new(self);
        (this.ptr, unsafe { ptr::read(&this.state) })
    }
}

impl<S: Smr> Drop for Protected<S> {
    fn drop(&mut self) {
        S::release(&mut self.state, self.ptr);
    }
}

/// A retired action waiting in a backend's deferred list.
pub(crate) struct Retired {
    pub(crate) ptr: *mut (),
    pub(crate) kind: RetireKind,
}

impl Retired {
    pub(crate) fn new(ptr: *mut (), kind: RetireKind) -> Self {
        Self { ptr, kind }
    }
}

// Empty placeholder so retired items can live in tinyvec bags.
impl Default for Retired {
    fn default() -> Self {
        Self {
            ptr: ptr::null_mut(),
            kind: RetireKind::DecrementStrong,
        }
    }
}

// Retired items move between threads through the orphan lists; the pointed
// to control block is owned by the retirement itself.
unsafe impl Send for Retired {}

#[inline]
pub(crate) fn header(ptr: *mut ()) -> *mut Header {
    ptr as *mut Header
}

/// Allocates a control block with both counts at one.
pub(crate) fn create_object<T, S: Smr>(value: T) -> *mut CountedObject<T> {
    let object = CountedObject::create(value);
    S::on_allocate();
    object
}

/// Frees a block whose payload is disposed and whose counts are latched.
pub(crate) unsafe fn delete_object(ptr: *mut ()) {
    Header::dealloc(header(ptr));
}

pub(crate) unsafe fn increment_ref_cnt(ptr: *mut ()) -> bool {
    (*header(ptr)).strong().increment(1)
}

pub(crate) unsafe fn increment_weak_cnt(ptr: *mut ()) -> bool {
    (*header(ptr)).weak().increment(1)
}

/// Immediate strong decrement. Only sound when no concurrent reader can be
/// racing on `ptr` — the eject path, where the backend has proven exactly
/// that, is the main caller.
pub(crate) unsafe fn decrement_ref_cnt<S: Smr>(ptr: *mut ()) {
    match (*header(ptr)).release_strong(1) {
        EjectAction::Nothing => {}
        EjectAction::Destroy => {
            Header::dispose(header(ptr));
            delete_object(ptr);
        }
        // Weak handles remain and one of them may be mid-upgrade through a
        // protected snapshot; even the disposal has to go through a grace
        // period.
        EjectAction::Delay => S::retire(ptr, RetireKind::Dispose),
    }
}

/// Immediate weak decrement; frees the block on collapse.
pub(crate) unsafe fn decrement_weak_cnt(ptr: *mut ()) {
    if (*header(ptr)).release_weak(1) {
        delete_object(ptr);
    }
}

/// The default path for every count drop originating from a shared slot or
/// a handle destructor.
pub(crate) unsafe fn delayed_decrement_ref_cnt<S: Smr>(ptr: *mut ()) {
    S::retire(ptr, RetireKind::DecrementStrong);
}

pub(crate) unsafe fn delayed_decrement_weak_cnt<S: Smr>(ptr: *mut ()) {
    S::retire(ptr, RetireKind::DecrementWeak);
}

/// Performs a deferred action once the backend has proven it safe.
pub(crate) unsafe fn eject<S: Smr>(ptr: *mut (), kind: RetireKind) {
    match kind {
        RetireKind::DecrementStrong => decrement_ref_cnt::<S>(ptr),
        RetireKind::DecrementWeak => decrement_weak_cnt(ptr),
        RetireKind::Dispose => {
            Header::dispose(header(ptr));
            decrement_weak_cnt(ptr);
        }
    }
}
