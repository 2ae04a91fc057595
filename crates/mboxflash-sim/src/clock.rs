//! Virtual time shared between the simulated target and the driver

use std::cell::Cell;
use std::rc::Rc;

use mboxflash_core::clock::Clock;

/// Virtual clock advanced by [`crate::SimTarget`] delays
///
/// Clones share the same time base, so the driver's deadlines move exactly
/// as fast as the target's simulated delays.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_us: Rc<Cell<u64>>,
}

impl SimClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in microseconds
    pub fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    /// Advance virtual time
    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now_us.get() / 1000
    }
}
