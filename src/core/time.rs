//! Clock abstraction for lease expiry and message timestamps
//!
//! Lease expiry is evaluated lazily against `Clock::now()`, so every
//! visibility decision in the broker flows through this trait. Tests swap in
//! a `MockClock` to step over multi-minute visibility timeouts instantly.

use crate::core::sync::recover_mutex;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic time, used for lease expiry comparisons
    fn now(&self) -> Instant;

    /// Wall-clock time, used for message enqueue timestamps
    fn system_time(&self) -> SystemTime;
}

/// Production clock backed by the operating system
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Clone)]
pub struct MockClock {
    current_instant: Arc<Mutex<Instant>>,
    current_system_time: Arc<Mutex<SystemTime>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Create a mock clock frozen at the current real time
    pub fn new() -> Self {
        Self {
            current_instant: Arc::new(Mutex::new(Instant::now())),
            current_system_time: Arc::new(Mutex::new(SystemTime::now())),
        }
    }

    /// Advance both monotonic and wall-clock time
    pub fn advance(&self, duration: Duration) {
        *recover_mutex(self.current_instant.lock()) += duration;
        *recover_mutex(self.current_system_time.lock()) += duration;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *recover_mutex(self.current_instant.lock())
    }

    fn system_time(&self) -> SystemTime {
        *recover_mutex(self.current_system_time.lock())
    }
}

/// Shared handle to the clock used by a broker
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
