//! Saturating atomic counter with a latched zero state.
//!
//! Both reference counts of a control block are sticky: once a count has
//! been *observed* at zero it can never again report or become nonzero.
//! This is the property that makes deferred reclamation sound — a stale
//! reader that finds an already-collapsed count cannot reincarnate the
//! object, no matter how its address gets reused.
//!
//! Bit layout (the behavioural contract, not an implementation detail):
//!
//! ```text
//! bit 63: zero flag       — latched; all increments fail while set
//! bit 62: zero pending    — a load caught the raw value at zero and is
//!                           cooperating with the decrementer on the latch
//! bits 0..=61: magnitude
//! ```

use core::sync::atomic::{fence, AtomicU64, Ordering};

const ZERO_FLAG: u64 = 1 << 63;
const ZERO_PENDING_FLAG: u64 = 1 << 62;

pub struct StickyCounter {
    value: AtomicU64,
}

impl StickyCounter {
    pub fn new(count: u64) -> Self {
        debug_assert!(count > 0 && count < ZERO_PENDING_FLAG);

        Self {
            value: AtomicU64::new(count),
        }
    }

    /// Adds `count`, failing iff the counter is already stuck at zero.
    ///
    /// Increments are relaxed: a successful increment means the caller
    /// already owned a contribution (or holds backend protection), so no
    /// ordering is carried by the count itself.
    pub fn increment(&self, count: u64) -> bool {
        let prior = self.value.fetch_add(count, Ordering::Relaxed);
        prior & ZERO_FLAG == 0
    }

    /// Subtracts `count`. Returns true exactly once: for the call that
    /// drives the magnitude to zero and wins the latch.
    ///
    /// Release on the subtraction plus an acquire fence on the zero path
    /// makes every prior owner's writes visible to the thread that will
    /// run the destructor.
    pub fn decrement(&self, count: u64) -> bool {
        if self.value.fetch_sub(count, Ordering::Release) != count {
            return false;
        }

        fence(Ordering::Acquire);

        // The magnitude hit zero. Latch the flag, unless a racing
        // increment resurrected the count first (legal: zero was never
        // observed), or a racing load already latched it for us.
        match self
            .value
            .compare_exchange(0, ZERO_FLAG, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(actual) => {
                actual & ZERO_PENDING_FLAG != 0
                    && self.value.swap(ZERO_FLAG, Ordering::SeqCst) & ZERO_PENDING_FLAG != 0
            }
        }
    }

    /// Swaps an exact raw value of `expected` for the latched zero state.
    ///
    /// Used by the strong-count collapse to claim the weak count's implicit
    /// contribution in one step when no weak handles exist.
    pub fn latch_if(&self, expected: u64) -> bool {
        debug_assert!(expected > 0 && expected < ZERO_PENDING_FLAG);

        self.value
            .compare_exchange(expected, ZERO_FLAG, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Current magnitude; zero is sticky.
    ///
    /// A load that catches the raw value at zero (after a decrement, before
    /// the decrementer's latch) latches it itself via the pending flag, so
    /// no later load can ever see the count bounce back up.
    pub fn load(&self) -> u64 {
        let mut value = self.value.load(Ordering::SeqCst);

        if value == 0 {
            match self.value.compare_exchange(
                0,
                ZERO_FLAG | ZERO_PENDING_FLAG,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return 0,
                Err(actual) => value = actual,
            }
        }

        if value & ZERO_FLAG != 0 {
            0
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StickyCounter;

    #[test]
    fn decrement_to_zero_reports_once() {
        let counter = StickyCounter::new(2);

        assert!(!counter.decrement(1));
        assert!(counter.decrement(1));
        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn increment_after_zero_fails_forever() {
        let counter = StickyCounter::new(1);

        assert!(counter.decrement(1));
        assert!(!counter.increment(1));
        assert!(!counter.increment(5));
        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn zero_is_sticky_through_load() {
        let counter = StickyCounter::new(1);
        assert!(counter.decrement(1));

        // Once zero has been reported, no sequence of operations may make
        // `load` report nonzero again.
        assert_eq!(counter.load(), 0);
        assert!(!counter.increment(1));
        assert_eq!(counter.load(), 0);
    }

    #[test]
    fn increment_before_zero_observed_resurrects() {
        let counter = StickyCounter::new(3);

        assert!(counter.increment(2));
        assert!(!counter.decrement(4));
        assert_eq!(counter.load(), 1);
    }

    #[test]
    fn latch_if_claims_exact_value() {
        let counter = StickyCounter::new(1);

        assert!(counter.latch_if(1));
        assert_eq!(counter.load(), 0);
        assert!(!counter.increment(1));

        let other = StickyCounter::new(2);
        assert!(!other.latch_if(1));
        assert_eq!(other.load(), 2);
    }
}
