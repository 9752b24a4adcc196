//! Monotonic nanosecond time source (C1).
//!
//! The engine never reads wall-clock time for deadlines: every expiry
//! computation goes through a [`Clock`], which is backed by `quanta` in
//! production and by [`MockClock`] in tests.

use std::sync::Arc;
use std::time::Duration;

use quanta::Clock as QuantaClock;

/// A monotonic source of nanosecond timestamps.
///
/// The default implementation ([`Clock::system`]) reads the OS monotonic
/// clock via `quanta`. Tests substitute [`MockClock`] to control time
/// deterministically.
pub trait Ticker: Send + Sync {
    /// Returns the current time as monotonic nanoseconds since some
    /// arbitrary, fixed epoch. Only differences between two calls are
    /// meaningful.
    fn now_nanos(&self) -> i64;
}

/// The production ticker, backed by `quanta::Clock`.
pub struct SystemTicker {
    clock: QuantaClock,
    start: quanta::Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        let clock = QuantaClock::new();
        let start = clock.now();
        Self { clock, start }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn now_nanos(&self) -> i64 {
        self.clock
            .now()
            .saturating_duration_since(self.start)
            .as_nanos() as i64
    }
}

/// A fake ticker that only advances when told to. Mirrors the teacher's
/// `quanta::Clock::mock()` pair, used throughout its own test module.
pub struct MockClock {
    nanos: parking_lot::Mutex<i64>,
}

impl MockClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nanos: parking_lot::Mutex::new(0),
        })
    }

    /// Advances the fake clock by `d`.
    pub fn advance(&self, d: Duration) {
        let mut nanos = self.nanos.lock();
        *nanos += d.as_nanos() as i64;
    }

    /// Sets the fake clock to an absolute number of milliseconds since
    /// the mock's creation. Convenient for the millisecond-denominated
    /// scenarios in spec.md §8.
    pub fn set_millis(&self, millis: i64) {
        *self.nanos.lock() = millis * 1_000_000;
    }
}

impl Ticker for MockClock {
    fn now_nanos(&self) -> i64 {
        *self.nanos.lock()
    }
}

/// A clonable handle to either the system ticker or a mock, shared between
/// a map and its scheduler.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<dyn Ticker>,
}

impl Clock {
    pub fn system() -> Self {
        Self {
            inner: Arc::new(SystemTicker::new()),
        }
    }

    pub fn from_ticker(ticker: Arc<dyn Ticker>) -> Self {
        Self { inner: ticker }
    }

    #[inline]
    pub fn now_nanos(&self) -> i64 {
        self.inner.now_nanos()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_monotonically() {
        let mock = MockClock::new();
        let clock = Clock::from_ticker(mock.clone());
        assert_eq!(clock.now_nanos(), 0);
        mock.advance(Duration::from_millis(100));
        assert_eq!(clock.now_nanos(), 100_000_000);
        mock.set_millis(50);
        assert_eq!(clock.now_nanos(), 50_000_000);
    }

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = Clock::system();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }
}
