use super::Arc;
use crate::object::CountedObject;
use crate::smr::{self, AcquireRetire, Smr};
use core::marker::PhantomData;
use core::ptr::NonNull;

/// An owning weak handle: keeps the control block allocated without
/// keeping the payload alive.
pub struct Weak<T, S: Smr = AcquireRetire> {
    ptr: NonNull<CountedObject<T>>,
    backend: PhantomData<S>,
}

unsafe impl<T: Send + Sync, S: Smr> Send for Weak<T, S> {}
unsafe impl<T: Send + Sync, S: Smr> Sync for Weak<T, S> {}

impl<T, S: Smr> Weak<T, S> {
    /// Takes ownership of one weak contribution at `ptr`.
    pub(crate) unsafe fn from_erased(ptr: *mut ()) -> Self {
        debug_assert!(!ptr.is_null());

        Self {
            ptr: NonNull::new_unchecked(ptr as *mut CountedObject<T>),
            backend: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> *mut () {
        self.ptr.as_ptr() as *mut ()
    }

    /// Attempts to recover a strong handle. Fails once the strong count
    /// has collapsed; the stickiness of the counter makes the failure
    /// permanent, so no retry loop is needed.
    pub fn upgrade(&self) -> Option<Arc<T, S>> {
        if unsafe { smr::increment_ref_cnt(self.raw()) } {
            Some(unsafe { Arc::from_erased(self.raw()) })
        } else {
            None
        }
    }

    /// Whether the payload is already gone. Zero is sticky, so `true`
    /// means every future [`upgrade`](Self::upgrade) will fail as well.
    pub fn expired(&self) -> bool {
        unsafe { self.ptr.as_ref() }.header().strong().load() == 0
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T, S: Smr> Clone for Weak<T, S> {
    fn clone(&self) -> Self {
        // Our own weak contribution keeps the counter off the floor.
        let ok = unsafe { smr::increment_weak_cnt(self.raw()) };
        debug_assert!(ok);

        Self {
            ptr: self.ptr,
            backend: PhantomData,
        }
    }
}

impl<T, S: Smr> Drop for Weak<T, S> {
    fn drop(&mut self) {
        unsafe {
            smr::delayed_decrement_weak_cnt::<S>(self.raw());
        }
    }
}
