//! Announcement-based reclamation ("acquire-retire").
//!
//! A thread that wants to trust a pointer read from a shared slot first
//! publishes the pointer in one of its own announcement cells and then
//! re-reads the slot; if the slot still holds the pointer, every later
//! reclamation scan is guaranteed to see the announcement and will hold
//! back the pointer's retired actions. Retirement itself is amortized: a
//! thread drains its deferred list only once it has grown past a fixed
//! multiple of the total announcement capacity, so each scan is paid for
//! by the retirements that triggered it.

use super::{
    delayed_decrement_ref_cnt, delayed_decrement_weak_cnt, eject, header, increment_ref_cnt,
    increment_weak_cnt, Protected, RetireKind, Retired, Smr, Strength,
};
use crate::backoff::Backoff;
use crate::barrier::{light_barrier, strong_barrier};
use crate::cache_padded::CachePadded;
use crate::registry;
use core::cell::{Cell, UnsafeCell};
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tinyvec::TinyVec;

/// Extra announcement cells per thread, i.e. how many snapshots a thread
/// can hold concurrently before they degrade to counted snapshots.
/// Compile-time knob: more cells mean cheaper snapshots but a larger scan.
pub(crate) const SNAPSHOT_SLOTS: usize = 7;

/// A thread drains once its deferred list exceeds this multiple of the
/// announcement capacity of all registered threads.
const CLEANUP_MULT: usize = 3;

/// Announcement cells start out (and are cleared back) to this sentinel;
/// null is a legitimate slot value and must stay distinguishable.
const INVALID: usize = usize::MAX;

struct ThreadSlots {
    /// The single cell backing transient acquires.
    current: CachePadded<AtomicUsize>,
    /// Cells backing live snapshots.
    extra: [AtomicUsize; SNAPSHOT_SLOTS],
    /// Deferred actions retired by this thread.
    retired: UnsafeCell<Vec<Retired>>,
    /// Set while this thread is draining; ejects can recursively retire
    /// and must not recursively drain.
    draining: Cell<bool>,
}

impl ThreadSlots {
    fn new() -> Self {
        const EMPTY_CELL: AtomicUsize = AtomicUsize::new(INVALID);

        Self {
            current: CachePadded::new(AtomicUsize::new(INVALID)),
            extra: [EMPTY_CELL; SNAPSHOT_SLOTS],
            retired: UnsafeCell::new(Vec::new()),
            draining: Cell::new(false),
        }
    }
}

// The announcement cells are written only by the owning thread and read by
// everyone during scans; `retired` and `draining` are touched exclusively
// by the owning thread (or, after exit, by the flush hook).
unsafe impl Send for ThreadSlots {}
unsafe impl Sync for ThreadSlots {}

struct Global {
    slots: Box<[CachePadded<ThreadSlots>]>,
    /// Deferred actions left behind by exited threads.
    orphans: Mutex<Vec<Retired>>,
}

static GLOBAL: Lazy<Global> = Lazy::new(|| {
    registry::at_thread_exit(flush_thread);

    Global {
        slots: (0..registry::MAX_THREADS)
            .map(|_| CachePadded::new(ThreadSlots::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice(),
        orphans: Mutex::new(Vec::new()),
    }
});

fn local() -> &'static CachePadded<ThreadSlots> {
    &GLOBAL.slots[registry::current()]
}

fn free_cell(me: &'static CachePadded<ThreadSlots>) -> Option<&'static AtomicUsize> {
    // Only the owner claims cells, so a relaxed read cannot race a claim.
    me.extra.iter().find(|cell| cell.load(Ordering::Relaxed) == INVALID)
}

fn cleanup_threshold() -> usize {
    (CLEANUP_MULT * (SNAPSHOT_SLOTS + 1) * registry::ceiling()).max(64)
}

/// Announce `slot`'s value in `cell` until the double-check stabilizes.
/// Returns the protected pointer, or null with `cell` cleared.
fn announce(slot: &AtomicUsize, cell: &AtomicUsize) -> usize {
    let backoff = Backoff::new();
    let mut value = slot.load(Ordering::SeqCst);

    loop {
        if value == 0 {
            cell.store(INVALID, Ordering::Release);
            return 0;
        }

        cell.store(value, Ordering::SeqCst);
        // The announcement must be globally visible before the re-read;
        // scans pair this with `strong_barrier`.
        light_barrier();

        let verify = slot.load(Ordering::SeqCst);
        if verify == value {
            return value;
        }

        value = verify;
        backoff.spin();
    }
}

fn announced_ptrs() -> Vec<usize> {
    let ceiling = registry::ceiling();
    let mut announced = Vec::with_capacity(ceiling * (SNAPSHOT_SLOTS + 1));

    for slots in GLOBAL.slots.iter().take(ceiling) {
        let current = slots.current.load(Ordering::SeqCst);
        if current != INVALID && current != 0 {
            announced.push(current);
        }

        for cell in &slots.extra {
            let value = cell.load(Ordering::SeqCst);
            if value != INVALID && value != 0 {
                announced.push(value);
            }
        }
    }

    announced.sort_unstable();
    announced
}

/// Scan every thread's announcements and eject what nobody protects.
/// Returns the number of ejected actions.
fn drain(id: usize, take_orphans: bool) -> usize {
    let me = &GLOBAL.slots[id];
    me.draining.set(true);

    let mut work = unsafe { mem::replace(&mut *me.retired.get(), Vec::new()) };

    if take_orphans {
        if let Ok(mut orphans) = GLOBAL.orphans.try_lock() {
            work.append(&mut orphans);
        }
    }

    strong_barrier();
    let protected = announced_ptrs();

    let mut kept: TinyVec<[Retired; 16]> = TinyVec::new();
    let mut ejected = 0;

    for item in work {
        if protected.binary_search(&(item.ptr as usize)).is_ok() {
            kept.push(item);
        } else {
            unsafe {
                eject::<AcquireRetire>(item.ptr, item.kind);
            }
            ejected += 1;
        }
    }

    // Ejects may have appended fresh retirements in the meantime; the
    // survivors just go back on top of them.
    unsafe {
        (*me.retired.get()).extend(kept);
    }

    me.draining.set(false);
    ejected
}

/// Exit hook: flush the exiting thread's deferred list to a fixpoint and
/// orphan whatever other threads still protect.
fn flush_thread(id: usize) {
    let me = &GLOBAL.slots[id];

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

    // Slot hygiene for the successor that reuses this id.
    me.current.store(INVALID, Ordering::SeqCst);
    for cell in &me.extra {
        cell.store(INVALID, Ordering::SeqCst);
    }
}

/// The announcement-based backend. This is the default `S` parameter of
/// every pointer type in the crate.
pub struct AcquireRetire;

/// Protection token of [`AcquireRetire`].
pub struct ArProtect(Repr);

enum Repr {
    Null,
    /// Backed by a live announcement cell; owns no count contribution.
    Cell(&'static AtomicUsize),
    /// Fallback when every cell was busy: owns one count contribution.
    Counted(Strength),
}

impl AcquireRetire {
    fn null() -> Protected<Self> {
        Protected::new(ptr::null_mut(), ArProtect(Repr::Null))
    }

    /// Snapshot fallback: protect transiently, take a real count, let the
    /// announcement go.
    fn counted_snapshot(slot: &AtomicUsize, strength: Strength) -> Protected<Self> {
        let transient = Self::acquire(slot);
        if transient.is_null() {
            return transient;
        }

        let raw = transient.as_ptr();
        let alive = unsafe {
            match strength {
                Strength::Strong => increment_ref_cnt(raw),
                Strength::Weak => increment_weak_cnt(raw),
            }
        };
        drop(transient);

        if alive {
            Protected::new(raw, ArProtect(Repr::Counted(strength)))
        } else {
            Self::null()
        }
    }
}

unsafe impl Smr for AcquireRetire {
    type ProtectState = ArProtect;

    fn acquire(slot: &AtomicUsize) -> Protected<Self> {
        if slot.load(Ordering::SeqCst) == 0 {
            return Self::null();
        }

        let cell: &'static AtomicUsize = &local().current;
        let value = announce(slot, cell);

        if value == 0 {
            Self::null()
        } else {
            Protected::new(value as *mut (), ArProtect(Repr::Cell(cell)))
        }
    }

    fn protect_snapshot(slot: &AtomicUsize, strength: Strength) -> Protected<Self> {
        let me = local();

        let cell = match free_cell(me) {
            Some(cell) => cell,
            None => return Self::counted_snapshot(slot, strength),
        };

        let value = announce(slot, cell);
        if value == 0 {
            return Self::null();
        }

        // A slot can hand out a pointer whose count has already collapsed
        // (e.g. a weak slot outliving every strong reference); report it
        // as null rather than a view of a disposed payload.
        let alive = unsafe {
            match strength {
                Strength::Strong => (*header(value as *mut ())).strong().load() > 0,
                Strength::Weak => (*header(value as *mut ())).weak().load() > 0,
            }
        };

        if alive {
            Protected::new(value as *mut (), ArProtect(Repr::Cell(cell)))
        } else {
            cell.store(INVALID, Ordering::Release);
            Self::null()
        }
    }

    fn reserve(ptr: *mut (), strength: Strength) -> Protected<Self> {
        if ptr.is_null() {
            return Self::null();
        }

        match free_cell(local()) {
            Some(cell) => {
                // No double-check: the caller vouches for the pointer, the
                // announcement only has to be visible before it lets go.
                cell.store(ptr as usize, Ordering::SeqCst);
                light_barrier();
                Protected::new(ptr, ArProtect(Repr::Cell(cell)))
            }
            None => {
                // The caller's own handle keeps this counter off the floor.
                let alive = unsafe {
                    match strength {
                        Strength::Strong => increment_ref_cnt(ptr),
                        Strength::Weak => increment_weak_cnt(ptr),
                    }
                };
                debug_assert!(alive, "reserve of a collapsed pointer");
                Protected::new(ptr, ArProtect(Repr::Counted(strength)))
            }
        }
    }

    fn release(state: &mut ArProtect, ptr: *mut ()) {
        match mem::replace(&mut state.0, Repr::Null) {
            Repr::Null => {}
            Repr::Cell(cell) => cell.store(INVALID, Ordering::Release),
            Repr::Counted(Strength::Strong) => unsafe {
                delayed_decrement_ref_cnt::<Self>(ptr);
            },
            Repr::Counted(Strength::Weak) => unsafe {
                delayed_decrement_weak_cnt::<Self>(ptr);
            },
        }
    }

    fn steal_count(state: &mut ArProtect, strength: Strength) -> bool {
        match state.0 {
            Repr::Counted(owned) if owned == strength => {
                state.0 = Repr::Null;
                true
            }
            _ => false,
        }
    }

    fn retire(ptr: *mut (), kind: RetireKind) {
        debug_assert!(!ptr.is_null());

        match registry::try_current() {
            Some(id) => {
                let me = &GLOBAL.slots[id];
                let deferred = unsafe {
                    let retired = &mut *me.retired.get();
                    retired.push(Retired::new(ptr, kind));
                    retired.len()
                };

                if deferred >= cleanup_threshold() && !me.draining.get() {
                    drain(id, true);
                }
            }
            // The thread is inside thread-local teardown; park the action
            // on the orphan list for whoever scans next.
            None => GLOBAL.orphans.lock().unwrap().push(Retired::new(ptr, kind)),
        }
    }

    fn collect() {
        let id = registry::current();

        while !unsafe { (*GLOBAL.slots[id].retired.get()).is_empty() }
            || !GLOBAL.orphans.lock().unwrap().is_empty()
        {
            if drain(id, true) == 0 {
                break;
            }
        }
    }
}
