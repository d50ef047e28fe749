use std::time::{Duration, Instant as HostInstant};

use leak_core::time::Instant;

/// Maps the host's monotonic clock onto core [`Instant`]s.
///
/// Every clone shares the same origin, so instants taken by the control loop,
/// the sampling thread and the sensor gateway are directly comparable.
#[derive(Copy, Clone, Debug)]
pub struct MonotonicClock {
    origin: HostInstant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: HostInstant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.to_core(HostInstant::now())
    }

    /// Converts a host instant, saturating at the origin.
    pub fn to_core(&self, instant: HostInstant) -> Instant {
        let micros = instant.saturating_duration_since(self.origin).as_micros();
        Instant::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_an_origin() {
        let clock = MonotonicClock::new();
        let copy = clock;
        let later = HostInstant::now() + Duration::from_millis(5);
        assert_eq!(clock.to_core(later), copy.to_core(later));
        assert!(clock.to_core(later) >= Instant::from_millis(5));
    }

    #[test]
    fn instants_before_origin_saturate() {
        let before = HostInstant::now();
        let clock = MonotonicClock::new();
        assert_eq!(clock.to_core(before), Instant::ZERO);
    }
}
