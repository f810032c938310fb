use super::{Arc, Weak};
use crate::object::CountedObject;
use crate::smr::{self, AcquireRetire, Protected, Smr, Strength};
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

/// A protected read-only view of a shared object.
///
/// Obtained from [`AtomicArc::get_snapshot`](super::AtomicArc::get_snapshot).
/// In the common case it owns no count contribution at all — only backend
/// protection — which is what makes repeated reads of a hot slot cheap.
/// Thread-bound and not sendable; convert to an [`Arc`] to move it.
pub struct Snapshot<T, S: Smr = AcquireRetire> {
    ptr: NonNull<CountedObject<T>>,
    state: S::ProtectState,
    // Protection states are registered with the creating thread.
    _not_send: PhantomData<*mut ()>,
}

impl<T, S: Smr> Snapshot<T, S> {
    pub(crate) fn from_protected(protected: Protected<S>) -> Option<Self> {
        if protected.is_null() {
            return None;
        }

        let (ptr, state) = protected.into_parts();

        Some(Self {
            ptr: unsafe { NonNull::new_unchecked(ptr as *mut CountedObject<T>) },
            state,
            _not_send: PhantomData,
        })
    }

    pub(crate) fn raw(&self) -> *mut () {
        self.ptr.as_ptr() as *mut ()
    }

    pub fn as_ptr(&self) -> *const T {
        unsafe { self.ptr.as_ref() }.data_ptr()
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Converts into an owning handle. If the protection already owns a
    /// strong contribution it is transferred; otherwise one is taken here,
    /// which cannot fail while the view is live.
    pub fn into_arc(mut self) -> Arc<T, S> {
        let raw = self.raw();

        if !S::steal_count(&mut self.state, Strength::Strong) {
            let ok = unsafe { smr::increment_ref_cnt(raw) };
            debug_assert!(ok);
        }

        // `self` drops here, releasing whatever protection remains.
        unsafe { Arc::from_erased(raw) }
    }
}

impl<T, S: Smr> Deref for Snapshot<T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref().data() }
    }
}

impl<T, S: Smr> Drop for Snapshot<T, S> {
    fn drop(&mut self) {
        let raw = self.raw();
        S::release(&mut self.state, raw);
    }
}

impl<T: fmt::Debug, S: Smr> fmt::Debug for Snapshot<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// The weak counterpart of [`Snapshot`]: a protected view that witnesses
/// the control block but not the payload, so it does not dereference.
pub struct WeakSnapshot<T, S: Smr = AcquireRetire> {
    ptr: NonNull<CountedObject<T>>,
    state: S::ProtectState,
    _not_send: PhantomData<*mut ()>,
}

impl<T, S: Smr> WeakSnapshot<T, S> {
    pub(crate) fn from_protected(protected: Protected<S>) -> Option<Self> {
        if protected.is_null() {
            return None;
        }

        let (ptr, state) = protected.into_parts();

        Some(Self {
            ptr: unsafe { NonNull::new_unchecked(ptr as *mut CountedObject<T>) },
            state,
            _not_send: PhantomData,
        })
    }

    pub(crate) fn raw(&self) -> *mut () {
        self.ptr.as_ptr() as *mut ()
    }

    /// Converts into an owning weak handle.
    pub fn into_weak(mut self) -> Weak<T, S> {
        let raw = self.raw();

        if !S::steal_count(&mut self.state, Strength::Weak) {
            let ok = unsafe { smr::increment_weak_cnt(raw) };
            debug_assert!(ok);
        }

        unsafe { Weak::from_erased(raw) }
    }

    /// Attempts to recover a strong handle; fails once the payload is gone.
    pub fn upgrade(&self) -> Option<Arc<T, S>> {
        if unsafe { smr::increment_ref_cnt(self.raw()) } {
            Some(unsafe { Arc::from_erased(self.raw()) })
        } else {
            None
        }
    }
}

impl<T, S: Smr> Drop for WeakSnapshot<T, S> {
    fn drop(&mut self) {
        let raw = self.raw();
        S::release(&mut self.state, raw);
    }
}
