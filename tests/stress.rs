use defrc::{AcquireRetire, Arc, AtomicArc, Ebr, Smr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc as StdArc;
use std::thread;

const MAGIC: u64 = 0x5f3c_9ad1_7e24_b680;

/// Payload that poisons itself on drop, so a reader holding a view of a
/// reclaimed object trips the assertion instead of silently reading junk.
struct Canary {
    magic: u64,
    generation: u64,
}

impl Canary {
    fn new(generation: u64) -> Self {
        Self {
            magic: MAGIC,
            generation,
        }
    }

    fn check(&self) -> u64 {
        assert_eq!(self.magic, MAGIC, "read of a reclaimed object");
        self.generation
    }
}

impl Drop for Canary {
    fn drop(&mut self) {
        self.magic = !MAGIC;
    }
}

fn readers() -> usize {
    num_cpus::get().max(2).min(8)
}

fn store_load_stress<S: Smr>() {
    const STORES: u64 = 10_000;

    let slot = StdArc::new(AtomicArc::<Canary, S>::new(Some(Arc::new(Canary::new(0)))));
    let done = StdArc::new(AtomicBool::new(false));

    let mut handles = Vec::new();

    for _ in 0..readers() {
        let slot = StdArc::clone(&slot);
        let done = StdArc::clone(&done);

        handles.push(thread::spawn(move || {
            let mut last = 0;

            while !done.load(Ordering::Relaxed) {
                // Alternate between the owning and the protected read path.
                let via_load = slot.load().unwrap().check();
                assert!(via_load >= last);
                last = via_load;

                let snapshot = slot.get_snapshot().unwrap();
                let via_snapshot = snapshot.check();
                assert!(via_snapshot >= last);
                last = via_snapshot;
            }
        }));
    }

    for generation in 1..=STORES {
        slot.store(Some(Arc::new(Canary::new(generation))));
    }

    done.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(slot.load().unwrap().check(), STORES);
    slot.store(None);
    S::collect();
}

#[test]
fn store_load_stress_acquire_retire() {
    store_load_stress::<AcquireRetire>();
}

#[test]
fn store_load_stress_ebr() {
    store_load_stress::<Ebr>();
}

fn cas_succeeds_exactly_once<S: Smr>() {
    const TARGET: u64 = 2_000;

    let slot = StdArc::new(AtomicArc::<Canary, S>::new(Some(Arc::new(Canary::new(0)))));
    let successes = StdArc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();

    for _ in 0..readers() {
        let slot = StdArc::clone(&slot);
        let successes = StdArc::clone(&successes);

        handles.push(thread::spawn(move || {
            loop {
                let current = slot.load().unwrap();
                let generation = current.check();
                if generation >= TARGET {
                    break;
                }

                let desired = Arc::new(Canary::new(generation + 1));
                if slot.compare_exchange(Some(&current), Some(&desired)) {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Every generation was claimed by exactly one winning exchange.
    assert_eq!(slot.load().unwrap().check(), TARGET);
    assert_eq!(successes.load(Ordering::SeqCst), TARGET as usize);

    slot.store(None);
    S::collect();
}

#[test]
fn cas_succeeds_exactly_once_acquire_retire() {
    cas_succeeds_exactly_once::<AcquireRetire>();
}

#[test]
fn cas_succeeds_exactly_once_ebr() {
    cas_succeeds_exactly_once::<Ebr>();
}

fn snapshot_heavy_readers<S: Smr>() {
    const STORES: u64 = 5_000;

    let slot = StdArc::new(AtomicArc::<Canary, S>::new(Some(Arc::new(Canary::new(0)))));
    let done = StdArc::new(AtomicBool::new(false));

    let mut handles = Vec::new();

    for _ in 0..readers() {
        let slot = StdArc::clone(&slot);
        let done = StdArc::clone(&done);

        handles.push(thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                // Hold a batch of views at once to push past the fast
                // per-thread protection capacity.
                let batch: Vec<_> = (0..10)
                    .filter_map(|_| slot.get_snapshot())
                    .collect();

                for snapshot in &batch {
                    snapshot.check();
                }
            }
        }));
    }

    for generation in 1..=STORES {
        slot.store(Some(Arc::new(Canary::new(generation))));
    }

    done.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    slot.store(None);
    S::collect();
}

#[test]
fn snapshot_heavy_readers_acquire_retire() {
    snapshot_heavy_readers::<AcquireRetire>();
}

#[test]
fn snapshot_heavy_readers_ebr() {
    snapshot_heavy_readers::<Ebr>();
}
