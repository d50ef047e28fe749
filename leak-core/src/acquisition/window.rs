//! Samples and the containers that hold them.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::time::Duration;

use crate::time::Instant;

/// One converted pressure reading.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    pub pressure_psi: f64,
    pub timestamp: Instant,
    /// Position within the acquisition session. Skipped numbers mark lost reads.
    pub sequence_no: u64,
}

impl Sample {
    #[must_use]
    pub const fn new(pressure_psi: f64, timestamp: Instant, sequence_no: u64) -> Self {
        Self {
            pressure_psi,
            timestamp,
            sequence_no,
        }
    }
}

/// Immutable, ordered samples from a single acquisition session.
///
/// Windows are only produced by sealing; there is no way to append after the
/// fact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleWindow {
    samples: Vec<Sample>,
}

impl SampleWindow {
    /// Window with no samples, as returned by stopping an idle pipeline.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Seals `samples`, which must already be in acquisition order.
    #[must_use]
    pub fn seal(samples: Vec<Sample>) -> Self {
        debug_assert!(
            samples
                .windows(2)
                .all(|pair| pair[0].sequence_no < pair[1].sequence_no),
            "samples must be sealed in acquisition order"
        );
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Time between the first and last sample.
    #[must_use]
    pub fn span(&self) -> Duration {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp.saturating_duration_since(first.timestamp),
            _ => Duration::ZERO,
        }
    }

    /// Total count of sequence numbers missing between consecutive samples.
    #[must_use]
    pub fn sequence_gaps(&self) -> u64 {
        self.samples
            .windows(2)
            .map(|pair| {
                pair[1]
                    .sequence_no
                    .saturating_sub(pair[0].sequence_no)
                    .saturating_sub(1)
            })
            .sum()
    }

    #[must_use]
    pub fn peak_pressure(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|sample| sample.pressure_psi)
            .reduce(f64::max)
    }
}

impl<'a> IntoIterator for &'a SampleWindow {
    type Item = &'a Sample;
    type IntoIter = core::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Bounded buffer that discards the oldest sample when full.
#[derive(Clone, Debug)]
pub struct SampleRing {
    samples: VecDeque<Sample>,
    capacity: usize,
    dropped: u64,
}

impl SampleRing {
    /// Allocates room for `capacity` samples up front.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples discarded by the drop-oldest policy since the last drain.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// Appends a sample, evicting the oldest one when the ring is full.
    pub fn push(&mut self, sample: Sample) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.dropped += 1;
        }
        self.samples.push_back(sample);
    }

    /// Moves every buffered sample into a sealed window and resets the drop count.
    pub fn drain_window(&mut self) -> SampleWindow {
        self.dropped = 0;
        SampleWindow::seal(self.samples.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn sample(pressure_psi: f64, millis: u64, sequence_no: u64) -> Sample {
        Sample::new(pressure_psi, Instant::from_millis(millis), sequence_no)
    }

    #[test]
    fn window_reports_span_gaps_and_peak() {
        let window = SampleWindow::seal(vec![
            sample(0.50, 0, 0),
            sample(0.53, 4, 1),
            sample(0.51, 12, 3),
            sample(0.49, 20, 7),
        ]);

        assert_eq!(window.len(), 4);
        assert_eq!(window.span(), Duration::from_millis(20));
        assert_eq!(window.sequence_gaps(), 4);
        assert_eq!(window.peak_pressure(), Some(0.53));
    }

    #[test]
    fn empty_window_has_no_peak() {
        let window = SampleWindow::empty();
        assert!(window.is_empty());
        assert_eq!(window.span(), Duration::ZERO);
        assert_eq!(window.sequence_gaps(), 0);
        assert_eq!(window.peak_pressure(), None);
    }

    #[test]
    fn ring_drops_oldest_when_full() {
        let mut ring = SampleRing::with_capacity(3);
        for seq in 0..5 {
            ring.push(sample(0.5, seq * 4, seq));
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.dropped(), 2);
        assert_eq!(ring.latest().map(|s| s.sequence_no), Some(4));

        let window = ring.drain_window();
        let sequence: Vec<u64> = window.iter().map(|s| s.sequence_no).collect();
        assert_eq!(sequence, vec![2, 3, 4]);
        assert_eq!(window.sequence_gaps(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.dropped(), 0);
    }
}
