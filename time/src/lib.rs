//! Abstract time handling for the TesseraDB client.
//!
//! Production code uses [`SystemProvider`]; tests swap in [`MockProvider`]
//! to drive recency-based logic (e.g. route-cache eviction) deterministically.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::explicit_iter_loop, clippy::use_self, clippy::clone_on_ref_ptr)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::ops::Add;
use std::time::Duration;

/// A UTC timestamp produced by a [`TimeProvider`].
///
/// Wall-clock based, so monotonicity is not guaranteed; consumers that only
/// need approximate recency ordering (the route cache) tolerate that.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Makes a new `Time` from the number of non-leap milliseconds since
    /// January 1, 1970 0:00:00 UTC (aka "UNIX timestamp").
    ///
    /// # Panics
    ///
    /// Panics if the value is out of range for chrono.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .expect("timestamp in range"),
        )
    }

    /// Returns the number of non-leap milliseconds since January 1, 1970 UTC.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// RFC 3339 rendering, used for operator-facing logs.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let duration = chrono::Duration::from_std(rhs).expect("duration in range");
        Self(self.0 + duration)
    }
}

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// A source of [`Time`].
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// Returns the current [`Time`]. No guarantees are made about monotonicity.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by [`Utc::now`].
#[derive(Debug, Default)]
pub struct SystemProvider {}

impl SystemProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed [`Time`], settable by tests.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Pin the clock to `time`.
    pub fn set(&self, time: Time) {
        *self.now.write() = time
    }

    /// Advance the clock by `duration`, returning the new time.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + duration;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_provider_advances() {
        let provider = SystemProvider::new();
        let a = provider.now();
        std::thread::sleep(Duration::from_millis(10));
        let b = provider.now();
        assert!(b.timestamp_millis() > a.timestamp_millis());
    }

    #[test]
    fn mock_provider_is_settable() {
        let provider = MockProvider::new(Time::from_timestamp_millis(0));
        assert_eq!(provider.now().timestamp_millis(), 0);
        assert_eq!(provider.now().timestamp_millis(), 0);

        provider.set(Time::from_timestamp_millis(42));
        assert_eq!(provider.now().timestamp_millis(), 42);

        provider.inc(Duration::from_millis(8));
        assert_eq!(provider.now().timestamp_millis(), 50);
    }

    #[test]
    fn millis_round_trip() {
        let t = Time::from_timestamp_millis(1_700_000_000_123);
        assert_eq!(t.timestamp_millis(), 1_700_000_000_123);
    }
}
