//! Epoch-based reclamation.
//!
//! A monotonically increasing global epoch is advanced amortized, every
//! `ADVANCE_EVERY` allocations per thread. A thread entering a read-side
//! section announces the epoch it observed; retirements are stamped with
//! the epoch current at retire time. An action is ejectable once its stamp
//! is strictly below the minimum announced epoch: every section that could
//! have seen the pointer has demonstrably ended. No per-pointer
//! bookkeeping exists — protection is the section itself.

use super::{header, Protected, RetireKind, Retired, Smr, Strength};
use crate::barrier::{light_barrier, strong_barrier};
use crate::cache_padded::CachePadded;
use crate::registry;
use core::cell::{Cell, UnsafeCell};
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tinyvec::TinyVec;

/// Announced by threads outside any read-side section; doubles as the
/// neutral element of the minimum scan.
const NO_EPOCH: u64 = u64::MAX;

/// Allocations between epoch advances, per thread. Compile-time knob:
/// higher advances less often, retaining more garbage but touching the
/// global epoch less.
const ADVANCE_EVERY: u32 = 128;

/// Deferred actions a thread accumulates before it scans.
const DRAIN_THRESHOLD: usize = 256;

struct ThreadEpoch {
    /// Epoch announced by this thread, `NO_EPOCH` when not in a section.
    local: CachePadded<AtomicU64>,
    /// Section nesting depth; only the outermost entry publishes.
    depth: Cell<u32>,
    /// Counts allocations towards the next epoch advance.
    allocations: Cell<u32>,
    /// Deferred actions with their retirement stamps.
    retired: UnsafeCell<Vec<(u64, Retired)>>,
    draining: Cell<bool>,
}

impl ThreadEpoch {
    fn new() -> Self {
        Self {
            local: CachePadded::new(AtomicU64::new(NO_EPOCH)),
            depth: Cell::new(0),
            allocations: Cell::new(0),
            retired: UnsafeCell::new(Vec::new()),
            draining: Cell::new(false),
        }
    }
}

// `local` is single-writer/multi-reader; the cells and the retired list
// are touched only by the owning thread (or the exit flush hook).
unsafe impl Send for ThreadEpoch {}
unsafe impl Sync for ThreadEpoch {}

struct Global {
    epoch: CachePadded<AtomicU64>,
    threads: Box<[CachePadded<ThreadEpoch>]>,
    orphans: Mutex<Vec<(u64, Retired)>>,
}

static GLOBAL: Lazy<Global> = Lazy::new(|| {
    registry::at_thread_exit(flush_thread);

    Global {
        epoch: CachePadded::new(AtomicU64::new(0)),
        threads: (0..registry::MAX_THREADS)
            .map(|_| CachePadded::new(ThreadEpoch::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
        orphans: Mutex::new(Vec::new()),
    }
});

fn local() -> &'static CachePadded<ThreadEpoch> {
    &GLOBAL.threads[registry::current()]
}

/// Enter a read-side section. Returns whether this call engaged the
/// announcement; nested entries are no-ops reporting `false`.
fn enter(me: &ThreadEpoch) -> bool {
    let depth = me.depth.get();
    me.depth.set(depth + 1);

    if depth != 0 {
        return false;
    }

    let mut epoch = GLOBAL.epoch.load(Ordering::SeqCst);

    // The announcement must be visible before any slot read made under
    // it, and it must match the global epoch at that point; re-check
    // until the two agree.
    loop {
        me.local.store(epoch, Ordering::SeqCst);
        light_barrier();

        let verify = GLOBAL.epoch.load(Ordering::SeqCst);
        if verify == epoch {
            return true;
        }

        epoch = verify;
    }
}

fn exit(me: &ThreadEpoch) {
    let depth = me.depth.get();
    debug_assert!(depth > 0, "epoch section exited more often than entered");
    me.depth.set(depth - 1);

    if depth == 1 {
        me.local.store(NO_EPOCH, Ordering::Release);
    }
}

/// Minimum epoch any thread currently announces.
fn min_announced() -> u64 {
    strong_barrier();

    GLOBAL
        .threads
        .iter()
        .take(registry::ceiling())
        .map(|thread| thread.local.load(Ordering::SeqCst))
        .min()
        .unwrap_or(NO_EPOCH)
}

fn drain(id: usize, take_orphans: bool) -> usize {
    let me = &GLOBAL.threads[id];
    me.draining.set(true);

    let mut work = unsafe { mem::replace(&mut *me.retired.get(), Vec::new()) };

    if take_orphans {
        if let Ok(mut orphans) = GLOBAL.orphans.try_lock() {
            work.append(&mut orphans);
        }
    }

    let min = min_announced();

    let mut kept: TinyVec<[(u64, Retired); 16]> = TinyVec::new();
    let mut ejected = 0;

    for (stamp, item) in work {
        if stamp < min {
            unsafe {
                super::eject::<Ebr>(item.ptr, item.kind);
            }
            ejected += 1;
        } else {
            kept.push((stamp, item));
        }
    }

    unsafe {
        (*me.retired.get()).extend(kept);
    }

    me.draining.set(false);
    ejected
}

fn flush_thread(id: usize) {
    let me = &GLOBAL.threads[id];
    me.local.store(NO_EPOCH, Ordering::SeqCst);

    loop {
        if unsafe { (*me.retired.get()).is_empty() } {
            break;
        }

        if drain(id, false) == 0 {
            let mut leftover = unsafe { mem::replace(&mut *me.retired.get(), Vec::new()) };
            GLOBAL.orphans.lock().unwrap().append(&mut leftover);
            break;
        }
    }
}

/// The epoch-based backend.
pub struct Ebr;

/// Protection token of [`Ebr`]: the read-side section itself.
pub struct EbrProtect(Repr);

enum Repr {
    Null,
    Section(&'static CachePadded<ThreadEpoch>),
}

impl Ebr {
    fn null() -> Protected<Self> {
        Protected::new(ptr::null_mut(), EbrProtect(Repr::Null))
    }
}

unsafe impl Smr for Ebr {
    type ProtectState = EbrProtect;

    fn acquire(slot: &AtomicUsize) -> Protected<Self> {
        let me = local();
        enter(me);

        let value = slot.load(Ordering::SeqCst);
        if value == 0 {
            exit(me);
            return Self::null();
        }

        Protected::new(value as *mut (), EbrProtect(Repr::Section(me)))
    }

    fn protect_snapshot(slot: &AtomicUsize, strength: Strength) -> Protected<Self> {
        let me = local();
        enter(me);

        let value = slot.load(Ordering::SeqCst);
        if value == 0 {
            exit(me);
            return Self::null();
        }

        let alive = unsafe {
            match strength {
                Strength::Strong => (*header(value as *mut ())).strong().load() > 0,
                Strength::Weak => (*header(value as *mut ())).weak().load() > 0,
            }
        };

        if alive {
            Protected::new(value as *mut (), EbrProtect(Repr::Section(me)))
        } else {
            exit(me);
            Self::null()
        }
    }

    fn reserve(ptr: *mut (), _strength: Strength) -> Protected<Self> {
        if ptr.is_null() {
            return Self::null();
        }

        let me = local();
        enter(me);
        Protected::new(ptr, EbrProtect(Repr::Section(me)))
    }

    fn release(state: &mut EbrProtect, _ptr: *mut ()) {
        if let Repr::Section(me) = mem::replace(&mut state.0, Repr::Null) {
            exit(me);
        }
    }

    fn steal_count(_state: &mut EbrProtect, _strength: Strength) -> bool {
        // Sections never own count contributions.
        false
    }

    fn retire(ptr: *mut (), kind: RetireKind) {
        debug_assert!(!ptr.is_null());
        let stamp = GLOBAL.epoch.load(Ordering::SeqCst);

        match registry::try_current() {
            Some(id) => {
                let me = &GLOBAL.threads[id];
                let deferred = unsafe {
                    let retired = &mut *me.retired.get();
                    retired.push((stamp, Retired::new(ptr, kind)));
                    retired.len()
                };

                if deferred >= DRAIN_THRESHOLD && !me.draining.get() {
                    drain(id, true);
                }
            }
            None => GLOBAL
                .orphans
                .lock()
                .unwrap()
                .push((stamp, Retired::new(ptr, kind))),
        }
    }

    fn on_allocate() {
        if let Some(id) = registry::try_current() {
            let me = &GLOBAL.threads[id];
            let allocations = me.allocations.get() + 1;

            if allocations == ADVANCE_EVERY {
                me.allocations.set(0);
                GLOBAL.epoch.fetch_add(1, Ordering::SeqCst);
            } else {
                me.allocations.set(allocations);
            }
        }
    }

    fn collect() {
        let id = registry::current();
        GLOBAL.epoch.fetch_add(1, Ordering::SeqCst);

        while !unsafe { (*GLOBAL.threads[id].retired.get()).is_empty() }
            || !GLOBAL.orphans.lock().unwrap().is_empty()
        {
            if drain(id, true) == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_publish_once() {
        let me = local();

        assert!(enter(me));
        let announced = me.local.load(Ordering::SeqCst);
        assert_ne!(announced, NO_EPOCH);

        // Nested entry is a no-op and reports not-engaged.
        assert!(!enter(me));
        assert_eq!(me.local.load(Ordering::SeqCst), announced);

        exit(me);
        assert_eq!(me.local.load(Ordering::SeqCst), announced);

        exit(me);
        assert_eq!(me.local.load(Ordering::SeqCst), NO_EPOCH);
    }

    #[test]
    fn retired_actions_survive_a_live_section() {
        struct Payload;

        let me = local();
        let object = crate::object::CountedObject::create(Payload) as *mut ();

        assert!(enter(me));
        // Simulate the last strong reference dropping while this thread
        // still sits inside a section.
        Ebr::retire(object, RetireKind::DecrementStrong);

        let before = unsafe { (*me.retired.get()).len() };
        drain(registry::current(), false);
        let after = unsafe { (*me.retired.get()).len() };
        assert_eq!(before, after);

        exit(me);

        // A section in a concurrently running test can hold the action
        // back for a few more passes.
        for _ in 0..10_000 {
            Ebr::collect();
            if unsafe { (*me.retired.get()).is_empty() } {
                return;
            }
            std::thread::yield_now();
        }

        panic!("retired action was never ejected");
    }
}
