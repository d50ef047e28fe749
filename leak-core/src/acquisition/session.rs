//! Bookkeeping for one streaming session.

use crate::hardware::HardwareError;
use crate::time::Instant;

use super::{RateMeter, Sample, SampleRing, SampleWindow, StreamRequest};

/// State owned by a running stream: the ring, sequence counter, rate meter and
/// the overshoot latch.
///
/// The sampling loop calls [`StreamSession::record`] for every converted
/// reading and [`StreamSession::record_fault`] for every failed one; readers
/// only ever see a consistent snapshot because the owner serializes access.
#[derive(Debug)]
pub struct StreamSession {
    request: StreamRequest,
    ring: SampleRing,
    meter: RateMeter,
    next_sequence: u64,
    overshoot: Option<Sample>,
    fault: Option<HardwareError>,
    faults_seen: u64,
}

impl StreamSession {
    #[must_use]
    pub fn new(request: StreamRequest, rate_window: usize) -> Self {
        Self {
            request,
            ring: SampleRing::with_capacity(request.buffer_capacity),
            meter: RateMeter::new(rate_window),
            next_sequence: 0,
            overshoot: None,
            fault: None,
            faults_seen: 0,
        }
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    /// Appends a reading and returns the stamped sample.
    pub fn record(&mut self, pressure_psi: f64, timestamp: Instant) -> Sample {
        let sample = Sample::new(pressure_psi, timestamp, self.next_sequence);
        self.next_sequence += 1;

        if self.overshoot.is_none()
            && self
                .request
                .trip_above_psi
                .is_some_and(|limit| pressure_psi > limit)
        {
            self.overshoot = Some(sample);
        }

        self.meter.record(timestamp);
        self.ring.push(sample);
        sample
    }

    /// Notes a failed read. Its sequence number is consumed so the gap is visible.
    pub fn record_fault(&mut self, error: HardwareError) {
        self.next_sequence += 1;
        self.faults_seen += 1;
        self.fault.get_or_insert(error);
    }

    pub fn latest(&self) -> Option<Sample> {
        self.ring.latest()
    }

    pub fn achieved_rate(&self) -> f64 {
        self.meter.rate_hz()
    }

    pub fn overshoot(&self) -> Option<Sample> {
        self.overshoot
    }

    /// Removes the first unreported read failure.
    pub fn take_fault(&mut self) -> Option<HardwareError> {
        self.fault.take()
    }

    pub fn faults_seen(&self) -> u64 {
        self.faults_seen
    }

    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Seals everything recorded so far.
    pub fn finish(mut self) -> SampleWindow {
        self.ring.drain_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overshoot_latches_first_offending_sample() {
        let mut session = StreamSession::new(StreamRequest::new(250, 16).with_trip(0.95), 50);
        session.record(0.80, Instant::from_millis(0));
        session.record(0.97, Instant::from_millis(4));
        session.record(1.01, Instant::from_millis(8));

        let tripped = session.overshoot().expect("overshoot latched");
        assert_eq!(tripped.sequence_no, 1);
        assert!((tripped.pressure_psi - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn faults_leave_sequence_gaps() {
        let mut session = StreamSession::new(StreamRequest::new(250, 16), 50);
        session.record(0.5, Instant::from_millis(0));
        session.record_fault(HardwareError::Bus);
        session.record_fault(HardwareError::Timeout);
        session.record(0.5, Instant::from_millis(12));

        assert_eq!(session.take_fault(), Some(HardwareError::Bus));
        assert_eq!(session.take_fault(), None);
        assert_eq!(session.faults_seen(), 2);

        let window = session.finish();
        assert_eq!(window.len(), 2);
        assert_eq!(window.sequence_gaps(), 2);
    }

    #[test]
    fn no_trip_without_limit() {
        let mut session = StreamSession::new(StreamRequest::new(250, 4), 50);
        session.record(5.0, Instant::from_millis(0));
        assert!(session.overshoot().is_none());
    }
}
