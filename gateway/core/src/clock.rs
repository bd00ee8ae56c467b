//! Time source abstraction
//!
//! The circuit breaker, rate limiter, response cache and budget windows all
//! read time through [`Clock`] so tests can drive them deterministically with
//! [`ManualClock`] instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for durations and windows
    fn now(&self) -> Instant;

    /// Wall-clock time in UTC, used for budget windows and usage records
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// The real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(Instant, DateTime<Utc>)>,
}

impl ManualClock {
    /// Start at the current real time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start at a fixed wall-clock time
    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((Instant::now(), utc)),
        }
    }

    /// Move both monotonic and wall-clock time forward
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 += by;
        state.1 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().0
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.state.lock().1
    }
}
