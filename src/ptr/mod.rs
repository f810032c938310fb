//! The user-facing pointer family.
//!
//! All handles are non-null; absence is `Option` at the API surface. Every
//! type is generic over the reclamation backend `S`, defaulting to
//! [`AcquireRetire`](crate::smr::AcquireRetire).

mod arc;
mod atomic;
mod snapshot;
mod weak;

pub use arc::Arc;
pub use atomic::{AtomicArc, AtomicWeak};
pub use snapshot::{Snapshot, WeakSnapshot};
pub use weak::Weak;

use crate::smr::Smr;

mod sealed {
    pub trait Sealed {}
}

/// Handles that keep their pointee's strong count above zero for their own
/// lifetime, making them valid as the expected side of a compare-exchange.
///
/// Implemented by [`Arc`] and [`Snapshot`]; sealed.
pub trait StrongPtr<T, S: Smr>: sealed::Sealed {
    #[doc(hidden)]
    fn as_erased(&self) -> *mut ();
}

impl<T, S: Smr> sealed::Sealed for Arc<T, S> {}

impl<T, S: Smr> StrongPtr<T, S> for Arc<T, S> {
    fn as_erased(&self) -> *mut () {
        self.raw()
    }
}

impl<T, S: Smr> sealed::Sealed for Snapshot<T, S> {}

impl<T, S: Smr> StrongPtr<T, S> for Snapshot<T, S> {
    fn as_erased(&self) -> *mut () {
        self.raw()
    }
}

/// Erases an optional strong handle to the word stored in atomic slots.
fn erase<T, S: Smr, P: StrongPtr<T, S>>(ptr: Option<&P>) -> *mut () {
    match ptr {
        Some(ptr) => ptr.as_erased(),
        None => core::ptr::null_mut(),
    }
}
