//! Wall-clock abstraction
//!
//! The orchestrator stamps download requests and judges object expiry with
//! unix timestamps; injecting the clock keeps those paths deterministic in
//! tests.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current wall-clock time in unix seconds
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// System clock backed by the OS time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_unix(), 100);

        clock.advance(60);
        assert_eq!(clock.now_unix(), 160);

        clock.set(0);
        assert_eq!(clock.now_unix(), 0);
    }

    #[test]
    fn test_system_clock_is_plausible() {
        // Any time after 2020 is good enough to prove we read the OS clock.
        assert!(SystemClock.now_unix() > 1_577_836_800);
    }
}
