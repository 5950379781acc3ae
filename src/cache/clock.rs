//! Time source for cache expiry

use std::time::Instant;

/// Supplies "now" for both the stored timestamp and the age check
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic process clock; immune to wall-clock adjustments
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
