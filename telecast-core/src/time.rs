//! Time sources
//!
//! Wall-clock time drives the dedup window, degraded stamp timestamps,
//! snapshot "changed at" stamps and staleness. Everything that needs "now"
//! takes a [`Clock`] so tests can pin it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time source for testing
///
/// Clones share the same instant, so a test can hold one handle and advance
/// the clock seen by a pipeline it handed the other to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Pin the clock at `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            instant: Arc::new(Mutex::new(at)),
        }
    }

    /// Move to an absolute instant
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard = at;
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances_for_all_clones() {
        let start = Utc.with_ymd_and_hms(2017, 4, 5, 19, 8, 7).unwrap();
        let clock = FixedClock::new(start);
        let other = clock.clone();

        other.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));

        clock.set(start);
        assert_eq!(other.now(), start);
    }

    #[test]
    fn system_clock_moves() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
