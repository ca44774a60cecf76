//! Physical clock effect
//!
//! Every expiry, escalation and TTL decision reads time through
//! [`PhysicalClock`] so tests can move the clock instead of sleeping.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Wall-clock source.
pub trait PhysicalClock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulation.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl SimulatedClock {
    /// Clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    /// Jump to an absolute instant (backwards is allowed).
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }
}

impl PhysicalClock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
