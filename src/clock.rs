//! Wall-clock abstraction used by date-based retry policies.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so `Retry-After` dates can be evaluated against a fake "now" in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    now: SystemTime,
}

impl FixedClock {
    pub fn new(now: SystemTime) -> Self {
        Self { now }
    }

    /// Frozen `secs` seconds after the Unix epoch.
    pub fn from_unix_secs(secs: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.now
    }
}
