//! Sampling cadence: deadline pacing and achieved-rate measurement.

use core::time::Duration;

use heapless::HistoryBuf;

use crate::time::Instant;

/// Largest rolling window a [`RateMeter`] can hold.
pub const MAX_RATE_WINDOW: usize = 256;

/// Rolling samples-per-second estimate over the most recent `window` timestamps.
///
/// The estimate is `(n - 1) / (t_last - t_first)`; it never interpolates over
/// missed reads, so a stalled loop shows up as a lower rate.
#[derive(Clone, Debug)]
pub struct RateMeter {
    stamps: HistoryBuf<Instant, MAX_RATE_WINDOW>,
    window: usize,
}

impl RateMeter {
    /// Creates a meter over `window` samples, clamped to `2..=MAX_RATE_WINDOW`.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            stamps: HistoryBuf::new(),
            window: window.clamp(2, MAX_RATE_WINDOW),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn record(&mut self, timestamp: Instant) {
        self.stamps.write(timestamp);
    }

    pub fn reset(&mut self) {
        self.stamps.clear();
    }

    /// Achieved rate in Hz, or `0.0` until two timestamps are available.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate_hz(&self) -> f64 {
        let count = self.stamps.len().min(self.window);
        if count < 2 {
            return 0.0;
        }

        let Some(first) = self
            .stamps
            .oldest_ordered()
            .nth(self.stamps.len() - count)
            .copied()
        else {
            return 0.0;
        };
        let Some(last) = self.stamps.recent().copied() else {
            return 0.0;
        };

        let elapsed = last.seconds_since(first);
        if elapsed <= 0.0 {
            return 0.0;
        }
        (count - 1) as f64 / elapsed
    }
}

/// Deadline scheduler for a fixed sampling rate.
///
/// Each deadline is derived from the previous one rather than from the time a
/// read finished. When the loop falls behind, the missed slots are skipped
/// and the schedule stays phase-aligned.
#[derive(Copy, Clone, Debug)]
pub struct Pacer {
    interval: Duration,
    deadline: Instant,
    overruns: u64,
}

impl Pacer {
    /// Starts a schedule whose first slot is `start`.
    #[must_use]
    pub fn new(rate_hz: u32, start: Instant) -> Self {
        Self {
            interval: interval_for(rate_hz),
            deadline: start,
            overruns: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline of the slot currently being served.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Slots skipped because the loop ran late.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Moves to the next slot after a read that finished at `now`.
    ///
    /// Returns the new deadline; the caller sleeps until it.
    pub fn advance(&mut self, now: Instant) -> Instant {
        let mut next = self.deadline + self.interval;
        if next < now && !self.interval.is_zero() {
            let behind = now.saturating_duration_since(next).as_micros();
            let step = self.interval.as_micros().max(1);
            let skipped = behind.div_ceil(step);
            self.overruns = self
                .overruns
                .saturating_add(u64::try_from(skipped).unwrap_or(u64::MAX));
            let catch_up = u64::try_from(skipped.saturating_mul(step)).unwrap_or(u64::MAX);
            next += Duration::from_micros(catch_up);
        }
        self.deadline = next;
        next
    }

    /// Time left until the current deadline.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Ideal spacing between samples at `rate_hz`, rounded down to whole microseconds.
#[must_use]
pub fn interval_for(rate_hz: u32) -> Duration {
    if rate_hz == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(1_000_000 / u64::from(rate_hz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_uses_only_the_configured_window() {
        let mut meter = RateMeter::new(5);
        // A slow start followed by a steady 250 Hz tail.
        meter.record(Instant::from_millis(0));
        meter.record(Instant::from_millis(100));
        for step in 0..5 {
            meter.record(Instant::from_millis(200 + step * 4));
        }

        assert!((meter.rate_hz() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn meter_needs_two_samples() {
        let mut meter = RateMeter::new(50);
        assert_eq!(meter.rate_hz(), 0.0);
        meter.record(Instant::from_millis(3));
        assert_eq!(meter.rate_hz(), 0.0);
        meter.record(Instant::from_millis(7));
        assert!((meter.rate_hz() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn meter_window_is_clamped() {
        assert_eq!(RateMeter::new(0).window(), 2);
        assert_eq!(RateMeter::new(10_000).window(), MAX_RATE_WINDOW);
    }

    #[test]
    fn pacer_schedules_from_previous_deadline() {
        let mut pacer = Pacer::new(250, Instant::ZERO);
        // Reads that finish early or slightly late do not shift the grid.
        assert_eq!(pacer.advance(Instant::from_micros(1_200)), Instant::from_micros(4_000));
        assert_eq!(pacer.advance(Instant::from_micros(4_900)), Instant::from_micros(8_000));
        assert_eq!(pacer.overruns(), 0);
    }

    #[test]
    fn pacer_resynchronizes_after_overrun() {
        let mut pacer = Pacer::new(250, Instant::ZERO);
        // Stalled for 13 ms: slots at 4, 8 and 12 ms are skipped.
        let next = pacer.advance(Instant::from_micros(13_000));
        assert_eq!(next, Instant::from_micros(16_000));
        assert_eq!(pacer.overruns(), 3);
        assert_eq!(pacer.remaining(Instant::from_micros(13_000)), Duration::from_millis(3));
    }

    #[test]
    fn interval_rounds_to_microseconds() {
        assert_eq!(interval_for(250), Duration::from_micros(4_000));
        assert_eq!(interval_for(860), Duration::from_micros(1_162));
        assert_eq!(interval_for(0), Duration::ZERO);
    }
}
