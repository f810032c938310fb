use super::Weak;
use crate::object::CountedObject;
use crate::smr::{self, AcquireRetire, Smr};
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

/// An owning strong handle to a shared object.
///
/// Owns exactly one strong count contribution. Dropping it never frees the
/// object inline; the decrement is deferred through the backend so a
/// concurrent reader that loaded the same address out of an atomic slot is
/// never left dangling.
pub struct Arc<T, S: Smr = AcquireRetire> {
    ptr: NonNull<CountedObject<T>>,
    backend: PhantomData<S>,
}

unsafe impl<T: Send + Sync, S: Smr> Send for Arc<T, S> {}
unsafe impl<T: Send + Sync, S: Smr> Sync for Arc<T, S> {}

impl<T: Send + Sync + 'static, S: Smr> Arc<T, S> {
    /// Allocates a new shared object with count one.
    pub fn new(value: T) -> Self {
        let object = smr::create_object::<T, S>(value);

        Self {
            // Box allocation is never null.
            ptr: unsafe { NonNull::new_unchecked(object) },
            backend: PhantomData,
        }
    }
}

impl<T, S: Smr> Arc<T, S> {
    /// Takes ownership of one strong contribution at `ptr`.
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

    fn object(&self) -> &CountedObject<T> {
        unsafe { self.ptr.as_ref() }
    }

    pub fn as_ptr(&self) -> *const T {
        self.object().data_ptr()
    }

    pub fn strong_count(&self) -> u64 {
        self.object().header().strong().load()
    }

    pub fn weak_count(&self) -> u64 {
        self.object().header().weak().load()
    }

    /// Creates a weak handle to the same object.
    pub fn downgrade(this: &Self) -> Weak<T, S> {
        // The payload is alive while `this` exists, so the weak counter
        // sits at one or above and the increment cannot fail.
        let ok = unsafe { smr::increment_weak_cnt(this.raw()) };
        debug_assert!(ok);

        unsafe { Weak::from_erased(this.raw()) }
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T, S: Smr> Deref for Arc<T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.object().data() }
    }
}

impl<T, S: Smr> Clone for Arc<T, S> {
    fn clone(&self) -> Self {
        // Our own contribution keeps the count off the floor.
        let ok = unsafe { smr::increment_ref_cnt(self.raw()) };
        debug_assert!(ok);

        Self {
            ptr: self.ptr,
            backend: PhantomData,
        }
    }
}

impl<T, S: Smr> Drop for Arc<T, S> {
    fn drop(&mut self) {
        unsafe {
            smr::delayed_decrement_ref_cnt::<S>(self.raw());
        }
    }
}

impl<T: fmt::Debug, S: Smr> fmt::Debug for Arc<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display, S: Smr> fmt::Display for Arc<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
