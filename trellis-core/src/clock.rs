//! Clock abstraction for timer-driven scheduling.
//!
//! Timed behavior in the engine (worker timeouts and function wake-ups)
//! reads time through [`EngineClock`], so tests can drive deadlines with a
//! [`MockClock`] instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Provider trait for time operations.
pub trait EngineClock: Send + Sync {
    /// Current time in milliseconds since UNIX epoch.
    fn now_millis(&self) -> u64;
}

/// Real clock that uses system time.
#[derive(Debug, Clone, Default)]
pub struct RealClock;

impl RealClock {
    /// Create a system-time clock.
    pub fn new() -> Self {
        Self
    }
}

impl EngineClock for RealClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Mock clock with controllable time.
///
/// Starts at zero (or a given epoch) and only moves when told to via
/// [`MockClock::advance`] or [`MockClock::set`]. Keep an `Arc` to the clock
/// you hand the root, advance it, then run the root to fire due timers.
#[derive(Debug, Default)]
pub struct MockClock {
    millis: AtomicU64,
}

impl MockClock {
    /// Create a mock clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock clock starting at `millis` past the epoch.
    pub fn at(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl EngineClock for MockClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
