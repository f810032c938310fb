use super::{erase, Arc, Snapshot, StrongPtr, Weak, WeakSnapshot};
use crate::smr::{self, AcquireRetire, Smr, Strength};
use core::marker::PhantomData;
use core::mem;
use core::sync::atomic::{AtomicUsize, Ordering};

/// A shared slot holding an optional [`Arc`], readable and replaceable by
/// any number of threads without a lock.
///
/// The slot owns one strong contribution for whatever it currently holds.
/// Writers hand their contribution to the slot; the displaced pointer's
/// contribution is retired, never dropped inline, so readers between their
/// slot read and their count increment are covered by the backend.
pub struct AtomicArc<T, S: Smr = AcquireRetire> {
    data: AtomicUsize,
    phantom: PhantomData<Arc<T, S>>,
}

unsafe impl<T: Send + Sync, S: Smr> Send for AtomicArc<T, S> {}
unsafe impl<T: Send + Sync, S: Smr> Sync for AtomicArc<T, S> {}

impl<T, S: Smr> AtomicArc<T, S> {
    /// An empty slot.
    pub fn null() -> Self {
        Self {
            data: AtomicUsize::new(0),
            phantom: PhantomData,
        }
    }

    /// A slot initially holding `value`; its contribution transfers in.
    pub fn new(value: Option<Arc<T, S>>) -> Self {
        Self {
            data: AtomicUsize::new(Self::take(value)),
            phantom: PhantomData,
        }
    }

    /// Consumes an owning handle, keeping its contribution for the slot.
    fn take(value: Option<Arc<T, S>>) -> usize {
        match value {
            Some(arc) => {
                let raw = arc.raw() as usize;
                mem::forget(arc);
                raw
            }
            None => 0,
        }
    }

    /// Loads the current value as an owning handle.
    pub fn load(&self) -> Option<Arc<T, S>> {
        let protected = S::acquire(&self.data);
        if protected.is_null() {
            return None;
        }

        // The slot's own contribution cannot be ejected while we hold the
        // protection, so the count is live and the increment succeeds.
        let ok = unsafe { smr::increment_ref_cnt(protected.as_ptr()) };
        debug_assert!(ok);

        Some(unsafe { Arc::from_erased(protected.as_ptr()) })
    }

    /// Loads the current value as a protected view, without touching the
    /// reference count in the common case.
    pub fn get_snapshot(&self) -> Option<Snapshot<T, S>> {
        Snapshot::from_protected(S::protect_snapshot(&self.data, Strength::Strong))
    }

    /// Replaces the held value, retiring the displaced one.
    pub fn store(&self, value: Option<Arc<T, S>>) {
        let old = self.data.swap(Self::take(value), Ordering::SeqCst);
        if old != 0 {
            unsafe {
                smr::delayed_decrement_ref_cnt::<S>(old as *mut ());
            }
        }
    }

    /// Like [`store`](Self::store), but sourced from a protected view; a
    /// fresh contribution is taken for the slot.
    pub fn store_snapshot(&self, value: Option<&Snapshot<T, S>>) {
        let new = match value {
            Some(snapshot) => {
                let raw = snapshot.raw();
                // The view keeps the count live.
                let ok = unsafe { smr::increment_ref_cnt(raw) };
                debug_assert!(ok);
                raw as usize
            }
            None => 0,
        };

        let old = self.data.swap(new, Ordering::SeqCst);
        if old != 0 {
            unsafe {
                smr::delayed_decrement_ref_cnt::<S>(old as *mut ());
            }
        }
    }

    /// Replaces the held value and returns the displaced one; both
    /// contributions transfer, nothing is retired.
    pub fn swap(&self, value: Option<Arc<T, S>>) -> Option<Arc<T, S>> {
        let old = self.data.swap(Self::take(value), Ordering::SeqCst);
        if old == 0 {
            None
        } else {
            Some(unsafe { Arc::from_erased(old as *mut ()) })
        }
    }

    /// Installs `desired` if the slot currently holds `expected`, judged by
    /// address. Returns whether the exchange happened; `desired` is
    /// borrowed either way and the displaced value is retired on success.
    pub fn compare_exchange<E>(&self, expected: Option<&E>, desired: Option<&Arc<T, S>>) -> bool
    where
        E: StrongPtr<T, S>,
    {
        self.cas(expected, desired, false)
    }

    /// Spurious-failure variant for use inside retry loops.
    pub fn compare_exchange_weak<E>(
        &self,
        expected: Option<&E>,
        desired: Option<&Arc<T, S>>,
    ) -> bool
    where
        E: StrongPtr<T, S>,
    {
        self.cas(expected, desired, true)
    }

    fn cas<E>(&self, expected: Option<&E>, desired: Option<&Arc<T, S>>, weak: bool) -> bool
    where
        E: StrongPtr<T, S>,
    {
        let expected_raw = erase(expected);
        let desired_raw = match desired {
            Some(arc) => arc.raw(),
            None => core::ptr::null_mut(),
        };

        // Between a successful hardware exchange and the increment below,
        // the slot holds `desired` without a contribution of its own; the
        // reservation blocks any concurrent displace-and-eject from
        // collapsing the count in that window.
        let _reserved = S::reserve(desired_raw, Strength::Strong);

        let exchanged = if weak {
            self.data
                .compare_exchange_weak(
                    expected_raw as usize,
                    desired_raw as usize,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        } else {
            self.data
                .compare_exchange(
                    expected_raw as usize,
                    desired_raw as usize,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        };

        if !exchanged {
            return false;
        }

        if !desired_raw.is_null() {
            let ok = unsafe { smr::increment_ref_cnt(desired_raw) };
            debug_assert!(ok);
        }

        if !expected_raw.is_null() {
            unsafe {
                smr::delayed_decrement_ref_cnt::<S>(expected_raw);
            }
        }

        true
    }

    /// All operations compile to plain atomics on the slot word.
    pub fn is_lock_free(&self) -> bool {
        true
    }
}

impl<T, S: Smr> Default for AtomicArc<T, S> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, S: Smr> Drop for AtomicArc<T, S> {
    fn drop(&mut self) {
        let old = *self.data.get_mut();
        if old != 0 {
            unsafe {
                smr::delayed_decrement_ref_cnt::<S>(old as *mut ());
            }
        }
    }
}

/// The weak counterpart of [`AtomicArc`]: the slot owns one weak
/// contribution for whatever it holds.
pub struct AtomicWeak<T, S: Smr = AcquireRetire> {
    data: AtomicUsize,
    phantom: PhantomData<Weak<T, S>>,
}

unsafe impl<T: Send + Sync, S: Smr> Send for AtomicWeak<T, S> {}
unsafe impl<T: Send + Sync, S: Smr> Sync for AtomicWeak<T, S> {}

impl<T, S: Smr> AtomicWeak<T, S> {
    pub fn null() -> Self {
        Self {
            data: AtomicUsize::new(0),
            phantom: PhantomData,
        }
    }

    pub fn new(value: Option<Weak<T, S>>) -> Self {
        Self {
            data: AtomicUsize::new(Self::take(value)),
            phantom: PhantomData,
        }
    }

    fn take(value: Option<Weak<T, S>>) -> usize {
        match value {
            Some(weak) => {
                let raw = weak.raw() as usize;
                mem::forget(weak);
                raw
            }
            None => 0,
        }
    }

    pub fn load(&self) -> Option<Weak<T, S>> {
        let protected = S::acquire(&self.data);
        if protected.is_null() {
            return None;
        }

        let ok = unsafe { smr::increment_weak_cnt(protected.as_ptr()) };
        debug_assert!(ok);

        Some(unsafe { Weak::from_erased(protected.as_ptr()) })
    }

    pub fn get_snapshot(&self) -> Option<WeakSnapshot<T, S>> {
        WeakSnapshot::from_protected(S::protect_snapshot(&self.data, Strength::Weak))
    }

    pub fn store(&self, value: Option<Weak<T, S>>) {
        let old = self.data.swap(Self::take(value), Ordering::SeqCst);
        if old != 0 {
            unsafe {
                smr::delayed_decrement_weak_cnt::<S>(old as *mut ());
            }
        }
    }

    pub fn swap(&self, value: Option<Weak<T, S>>) -> Option<Weak<T, S>> {
        let old = self.data.swap(Self::take(value), Ordering::SeqCst);
        if old == 0 {
            None
        } else {
            Some(unsafe { Weak::from_erased(old as *mut ()) })
        }
    }

    pub fn compare_exchange(&self, expected: Option<&Weak<T, S>>, desired: Option<&Weak<T, S>>) -> bool {
        let expected_raw = match expected {
            Some(weak) => weak.raw(),
            None => core::ptr::null_mut(),
        };
        let desired_raw = match desired {
            Some(weak) => weak.raw(),
            None => core::ptr::null_mut(),
        };

        let _reserved = S::reserve(desired_raw, Strength::Weak);

        if self
            .data
            .compare_exchange(
                expected_raw as usize,
                desired_raw as usize,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }

        if !desired_raw.is_null() {
            let ok = unsafe { smr::increment_weak_cnt(desired_raw) };
            debug_assert!(ok);
        }

        if !expected_raw.is_null() {
            unsafe {
                smr::delayed_decrement_weak_cnt::<S>(expected_raw);
            }
        }

        true
    }

    pub fn is_lock_free(&self) -> bool {
        true
    }
}

impl<T, S: Smr> Default for AtomicWeak<T, S> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, S: Smr> Drop for AtomicWeak<T, S> {
    fn drop(&mut self) {
        let old = *self.data.get_mut();
        if old != 0 {
            unsafe {
                smr::delayed_decrement_weak_cnt::<S>(old as *mut ());
            }
        }
    }
}
