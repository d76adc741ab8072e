//! Clock and TTL helpers.
//!
//! Staleness everywhere in the substrate is measured in whole elapsed
//! minutes: a lease is stale when `elapsed_minutes(created, now) > threshold`.
//! Timestamps are persisted as Unix milliseconds so that the same predicate
//! can be expressed as a single comparison inside SQL (see [`stale_cutoff_millis`]).

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};

use crate::{Error, Result};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for simulating lease expiry in tests and tools.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Move the clock forward by whole minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whole minutes elapsed between `from` and `to` (truncated).
#[must_use]
pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}

/// Whether a lease created at `created` has outlived `threshold_minutes` at `now`.
#[must_use]
pub fn is_stale(created: DateTime<Utc>, now: DateTime<Utc>, threshold_minutes: u32) -> bool {
    elapsed_minutes(created, now) > i64::from(threshold_minutes)
}

/// Millisecond timestamp at or below which a lease is stale.
///
/// Equivalent to [`is_stale`]: `floor((now - ts) / 1min) > t` holds exactly
/// when `ts <= now - (t + 1) minutes`.
#[must_use]
pub fn stale_cutoff_millis(now: DateTime<Utc>, threshold_minutes: u32) -> i64 {
    to_millis(now) - (i64::from(threshold_minutes) + 1) * 60_000
}

/// Convert a timestamp to its persisted form.
#[must_use]
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Decode a persisted timestamp.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::ParseError(format!("Invalid stored timestamp: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    #[test]
    fn test_elapsed_minutes_truncates() {
        let t0 = start();
        assert_eq!(elapsed_minutes(t0, t0 + Duration::seconds(59)), 0);
        assert_eq!(elapsed_minutes(t0, t0 + Duration::seconds(61)), 1);
        assert_eq!(elapsed_minutes(t0, t0 + Duration::minutes(31)), 31);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let t0 = start();
        assert!(!is_stale(t0, t0 + Duration::minutes(30), 30));
        assert!(!is_stale(t0, t0 + Duration::seconds(30 * 60 + 59), 30));
        assert!(is_stale(t0, t0 + Duration::minutes(31), 30));
    }

    #[test]
    fn test_cutoff_agrees_with_is_stale() {
        let t0 = start();
        for offset_secs in [0_i64, 59, 60, 1799, 1800, 1859, 1860, 1861, 4000] {
            let now = t0 + Duration::seconds(offset_secs);
            let by_minutes = is_stale(t0, now, 30);
            let by_cutoff = to_millis(t0) <= stale_cutoff_millis(now, 30);
            assert_eq!(by_minutes, by_cutoff, "disagreement at +{offset_secs}s");
        }
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(start());
        let other = clock.clone();
        clock.advance_minutes(31);
        assert_eq!(elapsed_minutes(start(), other.now()), 31);
    }

    #[test]
    fn test_millis_roundtrip_rejects_out_of_range() {
        assert!(from_millis(i64::MAX).is_err());
        assert_eq!(from_millis(to_millis(start())).ok(), Some(start()));
    }
}
