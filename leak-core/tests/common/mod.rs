#![allow(dead_code)]

use core::time::Duration;

use leak_core::acquisition::{
    Acquisition, AcquisitionError, Sample, SampleWindow, StreamRequest,
};
use leak_core::config::TestConfig;
use leak_core::hardware::{ActuatorGateway, HardwareError};
use leak_core::pneumatics::OutputId;
use leak_core::sequencer::{Sequencer, SequencerState};
use leak_core::telemetry::{TelemetryRecorder, TestEvent};
use leak_core::time::Instant;

/// Actuator gateway that records every write and can fail a chosen one.
#[derive(Default)]
pub struct MockActuators {
    pub writes: Vec<(OutputId, bool)>,
    pub levels: [bool; 4],
    pub fail_on: Option<(OutputId, bool)>,
    pub interlock_violations: usize,
}

impl MockActuators {
    pub fn failing_on(output: OutputId, on: bool) -> Self {
        Self {
            fail_on: Some((output, on)),
            ..Self::default()
        }
    }

    pub fn on_writes(&self, output: OutputId) -> usize {
        self.writes
            .iter()
            .filter(|&&(id, on)| id == output && on)
            .count()
    }

    pub fn all_off(&self) -> bool {
        self.levels.iter().all(|level| !level)
    }
}

impl ActuatorGateway for MockActuators {
    fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        if self.fail_on == Some((output, on)) {
            return Err(HardwareError::Bus);
        }
        self.writes.push((output, on));
        self.levels[output.as_index()] = on;

        let level = |id: OutputId| self.levels[id.as_index()];
        if (level(OutputId::Fill) && level(OutputId::Exhaust))
            || (level(OutputId::Extend) && level(OutputId::Retract))
        {
            self.interlock_violations += 1;
        }
        Ok(())
    }
}

/// Acquisition double driven entirely by the test.
pub struct ScriptedAcquisition {
    /// Pressure returned by every fast read.
    pub fast_pressure: f64,
    pub fast_fault: Option<HardwareError>,
    pub fast_reads: u64,
    /// Samples handed back, sealed, by the next `stop` of a running session.
    pub window: Vec<Sample>,
    pub streaming: bool,
    pub requests: Vec<StreamRequest>,
    pub stops: u32,
    pub start_error: Option<AcquisitionError>,
    pub overshoot: Option<Sample>,
    pub stream_fault: Option<HardwareError>,
}

impl ScriptedAcquisition {
    pub fn holding(fast_pressure: f64) -> Self {
        Self {
            fast_pressure,
            fast_fault: None,
            fast_reads: 0,
            window: Vec::new(),
            streaming: false,
            requests: Vec::new(),
            stops: 0,
            start_error: None,
            overshoot: None,
            stream_fault: None,
        }
    }

    pub fn with_window(mut self, window: Vec<Sample>) -> Self {
        self.window = window;
        self
    }
}

impl Acquisition for ScriptedAcquisition {
    fn start(&mut self, request: StreamRequest) -> Result<(), AcquisitionError> {
        if let Some(error) = self.start_error {
            return Err(error);
        }
        if self.streaming {
            return Err(AcquisitionError::AlreadyRunning);
        }
        self.requests.push(request);
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> SampleWindow {
        if !self.streaming {
            return SampleWindow::empty();
        }
        self.streaming = false;
        self.stops += 1;
        SampleWindow::seal(std::mem::take(&mut self.window))
    }

    fn read_fast(&mut self) -> Result<Sample, HardwareError> {
        if let Some(error) = self.fast_fault {
            return Err(error);
        }
        self.fast_reads += 1;
        Ok(Sample::new(self.fast_pressure, Instant::ZERO, self.fast_reads))
    }

    fn achieved_rate(&self) -> f64 {
        if self.streaming { 250.0 } else { 0.0 }
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn latest(&self) -> Option<Sample> {
        self.window.last().copied()
    }

    fn take_fault(&mut self) -> Option<HardwareError> {
        self.stream_fault.take()
    }

    fn overshoot(&self) -> Option<Sample> {
        self.overshoot
    }
}

pub type TestSequencer = Sequencer<MockActuators, ScriptedAcquisition, TelemetryRecorder<256>>;

pub const POLL: Duration = Duration::from_millis(50);

pub fn sequencer(actuators: MockActuators, acquisition: ScriptedAcquisition) -> TestSequencer {
    Sequencer::new(
        actuators,
        acquisition,
        TelemetryRecorder::new(),
        TestConfig::default(),
    )
}

/// Linear ramp sampled at 10 Hz over `secs` seconds.
#[allow(clippy::cast_precision_loss)]
pub fn ramp(from: f64, to: f64, secs: u64) -> Vec<Sample> {
    let steps = secs * 10;
    (0..=steps)
        .map(|step| {
            let fraction = step as f64 / steps as f64;
            Sample::new(
                from + (to - from) * fraction,
                Instant::from_millis(step * 100),
                step,
            )
        })
        .collect()
}

/// Polls every [`POLL`] from `start` until `stop` returns true or `limit` elapses.
///
/// Returns the instant of the last poll.
pub fn poll_until(
    sequencer: &mut TestSequencer,
    start: Instant,
    limit: Duration,
    mut stop: impl FnMut(SequencerState) -> bool,
) -> Instant {
    let mut now = start;
    let deadline = start + limit;
    while now <= deadline {
        let state = sequencer.poll(now);
        if stop(state) {
            return now;
        }
        now += POLL;
    }
    panic!("condition not reached within {limit:?}; state {:?}", sequencer.state());
}

pub fn run_to_completion(sequencer: &mut TestSequencer, start: Instant) -> Instant {
    poll_until(sequencer, start, Duration::from_secs(120), SequencerState::is_terminal)
}

pub fn events(sequencer: &TestSequencer) -> Vec<TestEvent> {
    sequencer
        .sink()
        .oldest_first()
        .map(|record| record.event)
        .collect()
}
