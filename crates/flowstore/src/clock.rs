//! Time sources for version timestamps.

use parking_lot::Mutex;
use time::OffsetDateTime;

/// Source of "now" for version entries.
///
/// The store never reads the wall clock directly, so tests can pin time and
/// exercise point-in-time queries deterministically.
pub trait Clock: std::fmt::Debug + Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```
/// use flowstore::{Clock, ManualClock};
/// use time::macros::datetime;
///
/// let clock = ManualClock::new(datetime!(2024-01-01 00:00 UTC));
/// clock.advance(time::Duration::minutes(5));
/// assert_eq!(clock.now(), datetime!(2024-01-01 00:05 UTC));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant (backwards jumps are allowed).
    pub fn set(&self, instant: OffsetDateTime) {
        *self.now.lock() = instant;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: time::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}
