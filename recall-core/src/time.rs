//! Wall-clock abstraction.
//!
//! Components that reason about elapsed time (cache expiry, LRU ordering)
//! read the clock through [`TimeSource`] so tests can drive time manually.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FakeTimeSource {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl FakeTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for FakeTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }
}
