//! Process-wide thread registry.
//!
//! Every participating thread is handed a small dense integer id on first
//! use; the reclamation backends index their per-thread slot arrays by it.
//! Ids are reused aggressively and kept as low as possible so that scans
//! only walk the occupied prefix of those arrays.
//!
//! The pool is sized once at `MAX_THREADS`. Registering more concurrent
//! threads than that is a hard capacity violation, not a recoverable error:
//! the slot arrays were sized at startup, so the process is terminated.

use once_cell::sync::Lazy;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Upper bound on concurrently registered threads.
///
/// Compile-time knob: raising it grows the per-thread slot arrays and the
/// worst-case scan, lowering it tightens both.
pub const MAX_THREADS: usize = 512;

/// Run when a registered thread exits, with the exiting thread's id.
/// Backends use this to flush their deferred lists.
type ExitHook = fn(usize);

struct IdAllocator {
    limit: u32,
    free: BinaryHeap<Reverse<u32>>,
}

impl IdAllocator {
    #[cold]
    #[inline(never)]
    fn new() -> Self {
        Self {
            limit: 0,
            free: BinaryHeap::new(),
        }
    }

    #[cold]
    #[inline(never)]
    fn allocate(&mut self) -> u32 {
        if let Some(Reverse(id)) = self.free.pop() {
            return id;
        }

        if self.limit as usize == MAX_THREADS {
            exhausted();
        }

        let id = self.limit;
        self.limit += 1;
        CEILING.fetch_max(self.limit as usize, Ordering::SeqCst);
        id
    }

    #[cold]
    #[inline(never)]
    fn deallocate(&mut self, id: u32) {
        self.free.push(Reverse(id));
    }
}

#[cold]
#[inline(never)]
fn exhausted() -> ! {
    eprintln!(
        "defrc: thread pool exhausted ({} concurrent threads); \
         the per-thread slot arrays are sized once at startup",
        MAX_THREADS
    );
    process::abort();
}

static ID_ALLOCATOR: Lazy<Mutex<IdAllocator>> = Lazy::new(|| Mutex::new(IdAllocator::new()));
static EXIT_HOOKS: Lazy<Mutex<Vec<ExitHook>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// High-water mark of allocated ids. Scans walk `0..ceiling()` instead of
/// the whole pool.
static CEILING: AtomicUsize = AtomicUsize::new(0);

struct Registration {
    id: u32,
}

impl Registration {
    #[cold]
    #[inline(never)]
    fn new() -> Self {
        Self {
            id: ID_ALLOCATOR.lock().unwrap().allocate(),
        }
    }
}

/// Drop is the only clean way to run code when a thread exits. Hooks run
/// before the id returns to the pool so a successor cannot alias the slots
/// mid-flush.
impl Drop for Registration {
    #[cold]
    #[inline(never)]
    fn drop(&mut self) {
        let hooks: Vec<ExitHook> = EXIT_HOOKS.lock().unwrap().clone();

        for hook in hooks {
            hook(self.id as usize);
        }

        ID_ALLOCATOR.lock().unwrap().deallocate(self.id);
    }
}

thread_local! {
    static REGISTRATION: Registration = Registration::new();
}

/// Dense id of the calling thread, registering it on first use.
#[inline]
pub fn current() -> usize {
    REGISTRATION.with(|r| r.id as usize)
}

/// Like [`current`] but yields `None` once the calling thread has entered
/// thread-local teardown. Retirements that race with teardown fall back to
/// the backends' orphan lists.
#[inline]
pub fn try_current() -> Option<usize> {
    REGISTRATION.try_with(|r| r.id as usize).ok()
}

pub fn ceiling() -> usize {
    CEILING.load(Ordering::SeqCst)
}

/// Register `hook` to run for every thread exit from now on.
/// Backends call this once from their lazy global initializer.
pub fn at_thread_exit(hook: ExitHook) {
    EXIT_HOOKS.lock().unwrap().push(hook);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn ids_stay_dense_under_reuse() {
        // Without reuse, 256 sequential registrations would push the
        // allocation limit past 128 no matter what other tests do
        // concurrently; with reuse the ids stay near the number of live
        // threads in the process.
        for _ in 0..256 {
            let id = thread::spawn(current).join().unwrap();
            assert!(id < 128);
        }
    }

    #[test]
    fn concurrent_ids_are_distinct() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (id_tx, id_rx) = mpsc::channel();
        let release_rx = std::sync::Arc::new(Mutex::new(release_rx));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let id_tx = id_tx.clone();
                let release_rx = std::sync::Arc::clone(&release_rx);

                thread::spawn(move || {
                    id_tx.send(current()).unwrap();
                    let _ = release_rx.lock().unwrap().recv();
                })
            })
            .collect();

        let mut ids: Vec<usize> = (0..8).map(|_| id_rx.recv().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        drop(release_tx);

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
