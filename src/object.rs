//! Control blocks: one allocation holding a payload and its bookkeeping.
//!
//! A block dies in two distinct events that may happen at different times:
//! the payload is *disposed* (dropped in place) when the strong count
//! collapses, and the block itself is *deallocated* when the weak count
//! follows. The weak count starts at one — the implicit "payload is still
//! alive" contribution — so weak handles outliving the payload keep only
//! the block, never the payload.

use crate::counter::StickyCounter;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicBool, Ordering};

/// What the caller of [`Header::release_strong`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EjectAction {
    /// Other strong contributions remain.
    Nothing,
    /// Strong and weak both collapsed; dispose and deallocate now.
    Destroy,
    /// Strong collapsed but weak handles remain; disposal must be deferred
    /// and the implicit weak contribution dropped afterwards.
    Delay,
}

/// Type-erased prefix of every control block.
///
/// The backends and the count plumbing only ever see `*mut Header`; the
/// payload type survives erasure through the two function pointers, bound
/// at allocation time.
pub(crate) struct Header {
    strong: StickyCounter,
    weak: StickyCounter,
    dispose: unsafe fn(*mut Header),
    dealloc: unsafe fn(*mut Header),
    #[cfg(debug_assertions)]
    disposed: AtomicBool,
}

impl Header {
    pub(crate) fn strong(&self) -> &StickyCounter {
        &self.strong
    }

    pub(crate) fn weak(&self) -> &StickyCounter {
        &self.weak
    }

    /// Drops `count` strong contributions and reports the resulting
    /// obligation. On the collapsing call the weak count's implicit
    /// contribution is claimed in the same step when no weak handles
    /// exist, allowing the whole block to die at once.
    pub(crate) fn release_strong(&self, count: u64) -> EjectAction {
        if !self.strong.decrement(count) {
            return EjectAction::Nothing;
        }

        if self.weak.load() == 1 && self.weak.latch_if(1) {
            EjectAction::Destroy
        } else {
            EjectAction::Delay
        }
    }

    /// Drops `count` weak contributions; true when the block may die.
    pub(crate) fn release_weak(&self, count: u64) -> bool {
        self.weak.decrement(count)
    }

    /// Runs the payload destructor in place. Exactly once per block.
    pub(crate) unsafe fn dispose(this: *mut Header) {
        #[cfg(debug_assertions)]
        {
            let was = (*this).disposed.swap(true, Ordering::SeqCst);
            debug_assert!(!was, "control block payload disposed twice");
        }

        ((*this).dispose)(this);
    }

    /// Frees the block. The payload must already have been disposed and
    /// both counts must be latched at zero.
    pub(crate) unsafe fn dealloc(this: *mut Header) {
        #[cfg(debug_assertions)]
        debug_assert!(
            (*this).disposed.load(Ordering::SeqCst),
            "control block freed with a live payload"
        );

        ((*this).dealloc)(this);
    }

    #[cfg(debug_assertions)]
    pub(crate) fn assert_live(&self) {
        debug_assert!(
            !self.disposed.load(Ordering::SeqCst),
            "dereference of a disposed payload"
        );
    }
}

/// A control block for payload type `T`.
///
/// `repr(C)` with the header first so that `*mut CountedObject<T>` and the
/// erased `*mut Header` are interchangeable addresses.
#[repr(C)]
pub(crate) struct CountedObject<T> {
    header: Header,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> CountedObject<T> {
    /// Allocates a block with both counts at one and the payload
    /// constructed in place.
    pub(crate) fn create(value: T) -> *mut CountedObject<T> {
        let object = CountedObject {
            header: Header {
                strong: StickyCounter::new(1),
                weak: StickyCounter::new(1),
                dispose: dispose_erased::<T>,
                dealloc: dealloc_erased::<T>,
                #[cfg(debug_assertions)]
                disposed: AtomicBool::new(false),
            },
            storage: UnsafeCell::new(MaybeUninit::new(value)),
        };

        Box::into_raw(Box::new(object))
    }

    /// # Safety
    /// The payload must not have been disposed and `self` must outlive the
    /// returned borrow (callers guarantee this through a count contribution
    /// or backend protection).
    pub(crate) unsafe fn data(&self) -> &T {
        #[cfg(debug_assertions)]
        self.header.assert_live();

        &*(*self.storage.get()).as_ptr()
    }

    /// Address of the payload storage. Does not touch the payload itself,
    /// so it is valid even after disposal.
    pub(crate) fn data_ptr(&self) -> *const T {
        unsafe { (*self.storage.get()).as_ptr() }
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }
}

unsafe fn dispose_erased<T>(header: *mut Header) {
    let object = header as *mut CountedObject<T>;
    ptr::drop_in_place((*(*object).storage.get()).as_mut_ptr());
}

unsafe fn dealloc_erased<T>(header: *mut Header) {
    // The payload is a disposed `MaybeUninit`, so dropping the box frees
    // the storage without running the payload destructor again.
    drop(Box::from_raw(header as *mut CountedObject<T>));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_when_no_weak_handles() {
        let object = CountedObject::create(7_u32);

        unsafe {
            assert_eq!((*object).header().release_strong(1), EjectAction::Destroy);
            Header::dispose(object as *mut Header);
            Header::dealloc(object as *mut Header);
        }
    }

    #[test]
    fn delay_when_weak_handles_remain() {
        let object = CountedObject::create(String::from("payload"));

        unsafe {
            let header = &*(object as *mut Header);
            assert!(header.weak().increment(1));

            assert_eq!(header.release_strong(1), EjectAction::Delay);
            Header::dispose(object as *mut Header);

            // The extra weak handle and the implicit contribution both
            // have to drop before the block may die.
            assert!(!header.release_weak(1));
            assert!(header.release_weak(1));
            Header::dealloc(object as *mut Header);
        }
    }
}
