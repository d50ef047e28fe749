//! Monotonic timestamps shared by every leak-tester component.
//!
//! Instants are plain microsecond counters so that samples, deadlines, and
//! telemetry can be compared and subtracted without touching a platform clock.
//! Hosts map their own monotonic source onto [`Instant`] at the boundary.

use core::fmt;
use core::ops::{Add, AddAssign};
use core::time::Duration;

/// Microseconds since an arbitrary, platform-defined epoch.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Instant(u64);

impl Instant {
    /// Instant at the epoch.
    pub const ZERO: Self = Self(0);

    /// Creates an instant from a microsecond count.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Creates an instant from a millisecond count.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    /// Creates an instant from a whole-second count.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Returns the raw microsecond count.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Returns the saturating duration from `earlier` to `self`.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Returns the duration from `earlier` to `self`, or `None` when `earlier` is later.
    #[must_use]
    pub const fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        match self.0.checked_sub(earlier.0) {
            Some(micros) => Some(Duration::from_micros(micros)),
            None => None,
        }
    }

    /// Signed seconds elapsed since `origin`, computed from integer microseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_since(self, origin: Self) -> f64 {
        if self.0 >= origin.0 {
            (self.0 - origin.0) as f64 / 1_000_000.0
        } else {
            -((origin.0 - self.0) as f64 / 1_000_000.0)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Instant(self.0.saturating_add(micros))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
