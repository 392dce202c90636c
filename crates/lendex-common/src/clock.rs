//! Time source for maturity checks and interest accrual

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of "now" for the engines
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }

    /// Move the clock forward by whole days
    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
