//! Time keeping for the router loop.
//!
//! The router schedules everything off two clocks read once per tick: a
//! millisecond wall clock for bookkeeping and a microsecond clock for the
//! ping cadence. Both are folded into [`Instant`], a microsecond timestamp
//! relative to an implementation-defined origin.
//!
//! The [`Timer`] trait is the seam to the platform; tests provide a manually
//! advanced implementation, the binary uses [`StdTimer`].

use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A span of time with microsecond resolution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(u64);

impl Duration {
    /// The gap inserted between duplicate sends of the same radio frame.
    pub const DUPLICATE_SEND_GAP: Self = Duration(2_000);

    pub const fn from_micros(micros: u64) -> Self {
        Duration(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Duration(millis * 1_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs * 1_000_000)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Whole milliseconds contained in `self`, rounding down.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Duration(self.0.checked_sub(rhs.0).expect("duration underflow"))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000 {
            write!(f, "{}.{:03}s", self.0 / 1_000_000, (self.0 % 1_000_000) / 1_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}ms", self.0 / 1_000)
        } else {
            write!(f, "{}µs", self.0)
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A point in time with microsecond resolution.
///
/// Instants from different [`Timer`] instances are not comparable. The
/// underlying value is 64 bits, so wraparound is not a practical concern.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Instant(u64);

impl Instant {
    /// Creates an `Instant` from raw microseconds since the timer's origin.
    ///
    /// This should only be called from a [`Timer`] implementation.
    pub const fn from_micros(micros: u64) -> Self {
        Instant(micros)
    }

    pub fn micros(&self) -> u64 {
        self.0
    }

    /// Whole milliseconds since the timer's origin.
    pub fn millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Instant(self.0 + d.as_micros())
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", Duration(self.0))
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// Trait for time providers.
///
/// `now` must be monotonic; `sleep` is only ever asked for a few
/// milliseconds at a time (duplicate-send gaps and the radio settle delay).
pub trait Timer {
    /// Returns the current time.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by [`std::time::Instant`].
pub struct StdTimer {
    origin: std::time::Instant,
}

impl StdTimer {
    pub fn new() -> Self {
        StdTimer {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for StdTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for StdTimer {
    fn now(&self) -> Instant {
        Instant::from_micros(self.origin.elapsed().as_micros() as u64)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(std::time::Duration::from_micros(duration.as_micros()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = Instant::from_micros(1_500);
        assert_eq!(t.millis(), 1);
        assert_eq!((t + Duration::from_millis(2)).micros(), 3_500);
        assert_eq!(t - Instant::from_micros(500), Duration::from_millis(1));
        // An earlier instant minus a later one clamps instead of wrapping.
        assert_eq!(Instant::from_micros(0) - t, Duration::from_micros(0));
    }

    #[test]
    fn std_timer_is_monotonic() {
        let timer = StdTimer::new();
        let a = timer.now();
        let b = timer.now();
        assert!(b >= a);
    }
}
