//! Test event catalog and the sinks that receive it.
//!
//! The sequencer reports everything it does as [`TestEvent`]s wrapped in an
//! [`EventRecord`]. Sinks are infallible from the sequencer's point of view: a
//! sink that cannot persist a record drops it and reports through its own
//! channel.

use core::fmt;

use heapless::HistoryBuf;

use crate::acquisition::SampleWindow;
use crate::evaluator::{ErrorReason, FailReason, Outcome, Verdict};
use crate::pneumatics::TestPhase;
use crate::time::Instant;

/// Identifier assigned to each emitted record.
pub type EventId = u32;

/// Identifier of one test run, counted from 1 per sequencer.
pub type RunId = u32;

/// Number of records kept by a default [`TelemetryRecorder`].
pub const TELEMETRY_RING_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TestEvent {
    PhaseEntered(TestPhase),
    PhaseExited(TestPhase),
    /// The fill valve was cycled for another attempt (`attempt` counts from 2).
    FillRetry { attempt: u8 },
    /// Emergency stop. `phase` is where the run was when it tripped.
    SafetyTrip {
        reason: ErrorReason,
        phase: Option<TestPhase>,
        pressure_psi: Option<f64>,
    },
    Verdict(Verdict),
}

impl TestEvent {
    const PHASE_ENTERED_BASE: u16 = 0x0000;
    const PHASE_EXITED_BASE: u16 = 0x0010;
    const FILL_RETRY_BASE: u16 = 0x0020;
    const SAFETY_TRIP_BASE: u16 = 0x0030;
    const VERDICT_PASS_CODE: u16 = 0x0040;
    const VERDICT_FAIL_BASE: u16 = 0x0048;
    const VERDICT_ERROR_BASE: u16 = 0x0050;

    /// Compact numeric code for the event kind and its discriminating field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_raw(&self) -> u16 {
        match self {
            TestEvent::PhaseEntered(phase) => Self::PHASE_ENTERED_BASE + phase.as_index() as u16,
            TestEvent::PhaseExited(phase) => Self::PHASE_EXITED_BASE + phase.as_index() as u16,
            TestEvent::FillRetry { attempt } => {
                let attempt = if *attempt > 0x0F { 0x0F } else { *attempt };
                Self::FILL_RETRY_BASE + attempt as u16
            }
            TestEvent::SafetyTrip { reason, .. } => Self::SAFETY_TRIP_BASE + error_index(*reason),
            TestEvent::Verdict(verdict) => match verdict.outcome {
                Outcome::Pass => Self::VERDICT_PASS_CODE,
                Outcome::Fail(reason) => Self::VERDICT_FAIL_BASE + fail_index(reason),
                Outcome::Error(reason) => Self::VERDICT_ERROR_BASE + error_index(reason),
            },
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            TestEvent::PhaseEntered(_) => "phase-entered",
            TestEvent::PhaseExited(_) => "phase-exited",
            TestEvent::FillRetry { .. } => "fill-retry",
            TestEvent::SafetyTrip { .. } => "safety-trip",
            TestEvent::Verdict(_) => "verdict",
        }
    }
}

impl fmt::Display for TestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestEvent::PhaseEntered(phase) => write!(f, "phase-entered {phase}"),
            TestEvent::PhaseExited(phase) => write!(f, "phase-exited {phase}"),
            TestEvent::FillRetry { attempt } => write!(f, "fill-retry attempt={attempt}"),
            TestEvent::SafetyTrip {
                reason,
                phase,
                pressure_psi,
            } => {
                write!(f, "safety-trip {}", reason.label())?;
                if let Some(phase) = phase {
                    write!(f, " phase={phase}")?;
                }
                if let Some(pressure) = pressure_psi {
                    write!(f, " pressure={pressure:.3}psi")?;
                }
                Ok(())
            }
            TestEvent::Verdict(verdict) => write!(f, "verdict {}", verdict.outcome),
        }
    }
}

const fn error_index(reason: ErrorReason) -> u16 {
    match reason {
        ErrorReason::HardwareFault => 0,
        ErrorReason::Overpressure => 1,
        ErrorReason::PhaseTimeout => 2,
        ErrorReason::Aborted => 3,
        ErrorReason::InsufficientSamples => 4,
        ErrorReason::StartingPressureOutOfRange => 5,
        ErrorReason::AcquisitionRejected => 6,
    }
}

const fn fail_index(reason: FailReason) -> u16 {
    match reason {
        FailReason::LeakRateExceeded => 0,
        FailReason::FillPressureNotReached => 1,
    }
}

/// Event stamped with its id, run and time of emission.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub run: RunId,
    pub timestamp: Instant,
    pub event: TestEvent,
}

/// Destination for sequencer events.
pub trait ResultSink {
    fn emit(&mut self, record: &EventRecord);

    /// Offered the sealed Testing window before it is evaluated.
    fn record_window(&mut self, _run: RunId, _window: &SampleWindow) {}
}

impl<T: ResultSink + ?Sized> ResultSink for &mut T {
    fn emit(&mut self, record: &EventRecord) {
        (**self).emit(record);
    }

    fn record_window(&mut self, run: RunId, window: &SampleWindow) {
        (**self).record_window(run, window);
    }
}

/// Sink that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn emit(&mut self, _: &EventRecord) {}
}

/// Keeps the most recent records in a fixed-size ring.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<EventRecord, CAPACITY>,
    windows_offered: u32,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            windows_offered: 0,
        }
    }

    /// Records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &EventRecord> + '_ {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&EventRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Most recent verdict still held in the ring.
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.ring
            .oldest_ordered()
            .filter_map(|record| match record.event {
                TestEvent::Verdict(verdict) => Some(verdict),
                _ => None,
            })
            .last()
    }

    /// Number of sealed windows this recorder has been offered.
    pub fn windows_offered(&self) -> u32 {
        self.windows_offered
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> ResultSink for TelemetryRecorder<CAPACITY> {
    fn emit(&mut self, record: &EventRecord) {
        self.ring.write(*record);
    }

    fn record_window(&mut self, _run: RunId, _window: &SampleWindow) {
        self.windows_offered = self.windows_offered.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec::Vec;

    use super::*;

    fn record(id: EventId, event: TestEvent) -> EventRecord {
        EventRecord {
            id,
            run: 1,
            timestamp: Instant::from_millis(u64::from(id)),
            event,
        }
    }

    #[test]
    fn raw_codes_are_distinct_per_kind() {
        let events = [
            TestEvent::PhaseEntered(TestPhase::Extending),
            TestEvent::PhaseEntered(TestPhase::Evaluating),
            TestEvent::PhaseExited(TestPhase::Extending),
            TestEvent::FillRetry { attempt: 2 },
            TestEvent::SafetyTrip {
                reason: ErrorReason::Overpressure,
                phase: None,
                pressure_psi: None,
            },
            TestEvent::Verdict(Verdict::without_window(Outcome::Pass)),
            TestEvent::Verdict(Verdict::without_window(Outcome::Fail(
                FailReason::FillPressureNotReached,
            ))),
            TestEvent::Verdict(Verdict::without_window(Outcome::Error(
                ErrorReason::AcquisitionRejected,
            ))),
        ];
        let mut codes: Vec<u16> = events.iter().map(TestEvent::to_raw).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), events.len());
        assert_eq!(TestEvent::PhaseExited(TestPhase::Testing).to_raw(), 0x0013);
    }

    #[test]
    fn recorder_keeps_most_recent_records() {
        let mut recorder: TelemetryRecorder<4> = TelemetryRecorder::new();
        for id in 0..6 {
            recorder.emit(&record(id, TestEvent::FillRetry { attempt: 2 }));
        }

        assert_eq!(recorder.len(), 4);
        let ids: Vec<EventId> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids, [2, 3, 4, 5]);
        assert_eq!(recorder.latest().map(|r| r.id), Some(5));
    }

    #[test]
    fn recorder_finds_last_verdict() {
        let mut recorder: TelemetryRecorder = TelemetryRecorder::new();
        recorder.emit(&record(0, TestEvent::PhaseEntered(TestPhase::Evaluating)));
        assert!(recorder.last_verdict().is_none());

        let verdict = Verdict::without_window(Outcome::Error(ErrorReason::Aborted));
        recorder.emit(&record(1, TestEvent::Verdict(verdict)));
        recorder.emit(&record(2, TestEvent::PhaseExited(TestPhase::Evaluating)));
        assert_eq!(recorder.last_verdict(), Some(verdict));
    }

    #[test]
    fn trip_display_includes_context() {
        let event = TestEvent::SafetyTrip {
            reason: ErrorReason::Overpressure,
            phase: Some(TestPhase::Stabilizing),
            pressure_psi: Some(1.0),
        };
        assert_eq!(
            event.to_string(),
            "safety-trip overpressure phase=stabilizing pressure=1.000psi"
        );
    }
}
