//! Wall clocks
//!
//! Cooldowns and startup windows outlive the process, so they are measured
//! in wall-clock time (UTC), not in monotonic instants.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock backed by `Utc::now()`
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests
/// Only moves when told to; NEVER moves backwards
#[derive(Debug)]
pub struct ManualClock {
    value: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            value: Mutex::new(start),
        }
    }

    /// Fixed, readable epoch for tests (2024-01-01T00:00:00Z)
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut value = self.value.lock();
        *value = add_duration(*value, by);
    }

    /// Jump to a specific time (only forward)
    pub fn set(&self, to: DateTime<Utc>) {
        let mut value = self.value.lock();
        if to > *value {
            *value = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.value.lock()
    }
}

/// Add a std duration to a timestamp, saturating at the far future
pub fn add_duration(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Elapsed time from `earlier` to `later`, zero if `later` is not after `earlier`
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_epoch();
        let t1 = clock.now();
        clock.advance(Duration::from_secs(90));
        let t2 = clock.now();

        assert_eq!(elapsed_between(t1, t2), Duration::from_secs(90));
    }

    #[test]
    fn test_manual_clock_never_moves_backwards() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.advance(Duration::from_secs(10));
        clock.set(start);

        assert_eq!(elapsed_between(start, clock.now()), Duration::from_secs(10));
    }

    #[test]
    fn test_elapsed_between_clamps_negative() {
        let clock = ManualClock::at_epoch();
        let later = add_duration(clock.now(), Duration::from_secs(5));
        assert_eq!(elapsed_between(later, clock.now()), Duration::ZERO);
    }

    #[test]
    fn test_add_duration_saturates() {
        let far = add_duration(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
