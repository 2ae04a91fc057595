//! Time source for command-cycle deadlines
//!
//! Deadlines are expressed in milliseconds against an injected [`Clock`] so
//! that the poll loop does not depend on any particular timer or runtime.

/// Monotonic millisecond time source
pub trait Clock {
    /// Milliseconds elapsed since an arbitrary, fixed origin
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}
