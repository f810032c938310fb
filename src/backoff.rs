// LICENSE NOTICE: Most of this code has been copied from the crossbeam repository with the MIT license.

use core::cell::Cell;
use core::hint;

const SPIN_LIMIT: u32 = 6;

/// Exponential busy-wait used in the double-checked announcement loop and
/// other bounded retry loops. Waiting grows with the internal counter up to
/// a fixed cap; the loops this backs are bounded by contention, not time.
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    pub fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    /// Spin some time based on the internal counter and then increment it.
    pub fn spin(&self) {
        for _ in 0..1 << self.step.get().min(SPIN_LIMIT) {
            hint::spin_loop();
        }

        if self.step.get() <= SPIN_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
