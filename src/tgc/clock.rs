//! Wall-clock abstraction
//!
//! The garbage collector only needs second resolution. Hiding the clock
//! behind a trait lets the tests drive time explicitly.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock seconds
pub trait Clock: Send + Sync {
    /// Current time in seconds since the UNIX epoch
    fn now_secs(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Mutex<i64>,
}

impl FakeClock {
    /// Create a fake clock starting at the given time
    pub fn new(now: i64) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Move the clock forward
    pub fn advance(&self, secs: i64) {
        *self.now.lock() += secs;
    }

    /// Set the clock to an absolute time
    pub fn set(&self, now: i64) {
        *self.now.lock() = now;
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> i64 {
        *self.now.lock()
    }
}

// =============================================================================
// Tests
// =============================================================================
