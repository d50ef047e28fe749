//! Leak-test sequencer.
//!
//! [`Sequencer`] walks [`LEAK_TEST_PLAN`](crate::pneumatics::LEAK_TEST_PLAN)
//! one poll at a time. The caller owns the clock: every entry point takes the
//! current [`Instant`], and the sequencer never sleeps or blocks. Each poll
//! runs, in priority order:
//!
//! 1. the pressure check (fast read outside Testing, streaming overshoot and
//!    fault latches during Testing),
//! 2. the abort request,
//! 3. the per-phase safety timeout,
//! 4. phase advancement, which may cascade through several instantaneous
//!    phases within one poll.
//!
//! Any of the first three ends the run with an emergency stop.

mod context;

use core::fmt;

use crate::acquisition::{Acquisition, AcquisitionError, StreamRequest};
use crate::config::{ConfigError, TestConfig};
use crate::evaluator::{self, ErrorReason, EvaluationCriteria, FailReason, Outcome, Verdict};
use crate::hardware::ActuatorGateway;
use crate::pneumatics::{ActuatorBank, OutputId, PhaseCompletion, TestPhase, step_for};
use crate::status::SequencerSnapshot;
use crate::telemetry::{EventRecord, ResultSink, RunId, TestEvent};
use crate::time::Instant;

pub use context::{SequencerContext, SequencerState};

/// Reasons a start or configuration request is refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartRejection {
    /// A test is already in flight.
    Busy,
    /// Outputs from the previous session are not confirmed released.
    NotReady,
    /// An overpressure trip is latched until reset.
    SafetyLatched,
    InvalidConfig(ConfigError),
}

impl fmt::Display for StartRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRejection::Busy => f.write_str("test already running"),
            StartRejection::NotReady => f.write_str("actuators not confirmed off"),
            StartRejection::SafetyLatched => f.write_str("overpressure latched; reset required"),
            StartRejection::InvalidConfig(error) => write!(f, "invalid configuration: {error}"),
        }
    }
}

/// Safety trip detected during a poll.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Trip {
    reason: ErrorReason,
    pressure_psi: Option<f64>,
}

impl Trip {
    const fn new(reason: ErrorReason) -> Self {
        Self {
            reason,
            pressure_psi: None,
        }
    }

    const fn at(reason: ErrorReason, pressure_psi: f64) -> Self {
        Self {
            reason,
            pressure_psi: Some(pressure_psi),
        }
    }
}

/// What a phase wants after being checked.
enum Step {
    Hold,
    Advance(TestPhase),
    Conclude(Verdict),
}

/// Finite-state machine driving one leak test at a time.
pub struct Sequencer<A, Q, S> {
    bank: ActuatorBank<A>,
    acquisition: Q,
    sink: S,
    ctx: SequencerContext,
}

impl<A, Q, S> Sequencer<A, Q, S>
where
    A: ActuatorGateway,
    Q: Acquisition,
    S: ResultSink,
{
    /// Builds a sequencer and releases every output.
    ///
    /// If the release fails the sequencer still constructs, but refuses to
    /// start until [`Sequencer::reset`] succeeds.
    pub fn new(actuators: A, acquisition: Q, sink: S, config: TestConfig) -> Self {
        let mut bank = ActuatorBank::new(actuators);
        let _ = bank.force_all_off();
        Self {
            bank,
            acquisition,
            sink,
            ctx: SequencerContext::new(config),
        }
    }

    pub fn context(&self) -> &SequencerContext {
        &self.ctx
    }

    pub fn state(&self) -> SequencerState {
        self.ctx.state
    }

    pub fn actuators(&self) -> &ActuatorBank<A> {
        &self.bank
    }

    pub fn acquisition(&self) -> &Q {
        &self.acquisition
    }

    pub fn acquisition_mut(&mut self) -> &mut Q {
        &mut self.acquisition
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Replaces the configuration used by subsequent runs.
    pub fn set_config(&mut self, config: TestConfig) -> Result<(), StartRejection> {
        if self.ctx.state.is_running() {
            return Err(StartRejection::Busy);
        }
        config
            .validate(self.acquisition.max_rate_hz())
            .map_err(StartRejection::InvalidConfig)?;
        self.ctx.config = config;
        Ok(())
    }

    /// Starts a run at `now`, entering the first phase immediately.
    pub fn start_test(&mut self, now: Instant) -> Result<RunId, StartRejection> {
        if self.ctx.state.is_running() {
            return Err(StartRejection::Busy);
        }
        if self.ctx.overpressure_latched {
            return Err(StartRejection::SafetyLatched);
        }
        self.ctx
            .config
            .validate(self.acquisition.max_rate_hz())
            .map_err(StartRejection::InvalidConfig)?;
        if !self.bank.confirmed_off() {
            return Err(StartRejection::NotReady);
        }

        let run = self.ctx.begin_run(now);
        self.enter(TestPhase::FIRST, now);
        Ok(run)
    }

    /// Requests that the current run stop at the next poll.
    ///
    /// Returns `false` when no run is in flight.
    pub fn request_abort(&mut self) -> bool {
        if self.ctx.state.is_running() {
            self.ctx.abort_requested = true;
            true
        } else {
            false
        }
    }

    /// Clears the overpressure latch and re-verifies that every output is off.
    pub fn reset(&mut self) -> Result<(), StartRejection> {
        if self.ctx.state.is_running() {
            return Err(StartRejection::Busy);
        }
        if self.acquisition.is_streaming() {
            let _ = self.acquisition.stop();
        }
        self.bank
            .force_all_off()
            .map_err(|_| StartRejection::NotReady)?;
        self.ctx.overpressure_latched = false;
        self.ctx.abort_requested = false;
        self.ctx.state = SequencerState::Idle;
        Ok(())
    }

    /// Advances the machine to `now` and returns the resulting state.
    pub fn poll(&mut self, now: Instant) -> SequencerState {
        let phase = match self.ctx.state {
            SequencerState::Idle => return SequencerState::Idle,
            SequencerState::EmergencyStop(_) | SequencerState::Complete(_) => {
                self.ctx.state = SequencerState::Idle;
                return SequencerState::Idle;
            }
            SequencerState::Running(phase) => phase,
        };

        if let Some(trip) = self.check_pressure(phase) {
            self.emergency_stop(trip, now);
            return self.ctx.state;
        }

        if self.ctx.abort_requested {
            self.emergency_stop(Trip::new(ErrorReason::Aborted), now);
            return self.ctx.state;
        }

        let timeout = self.ctx.config.safety.safety_timeout;
        if self
            .ctx
            .attempt_started_at
            .is_some_and(|started| now.saturating_duration_since(started) > timeout)
        {
            let trip = Trip {
                reason: ErrorReason::PhaseTimeout,
                pressure_psi: self.ctx.last_pressure_psi,
            };
            self.emergency_stop(trip, now);
            return self.ctx.state;
        }

        self.advance(now);
        self.ctx.state
    }

    /// Read-only view for status displays.
    pub fn snapshot(&self, now: Instant) -> SequencerSnapshot {
        let ctx = &self.ctx;
        SequencerSnapshot {
            state: ctx.state,
            run: ctx.run,
            phase_elapsed: ctx
                .phase_started_at
                .filter(|_| ctx.state.is_running())
                .map(|started| now.saturating_duration_since(started)),
            run_elapsed: ctx
                .run_started_at
                .filter(|_| ctx.state.is_running())
                .map(|started| now.saturating_duration_since(started)),
            fill_attempts: ctx.fill_attempts,
            max_fill_attempts: ctx.config.safety.max_fill_attempts,
            pressure_psi: ctx.last_pressure_psi,
            peak_pressure_psi: ctx.peak_pressure_psi,
            target_fill_psi: ctx.config.pressure.target_fill_psi,
            achieved_rate_hz: self.acquisition.achieved_rate(),
            streaming: self.acquisition.is_streaming(),
            actuators: self.bank.state(),
            actuators_confirmed_off: self.bank.confirmed_off(),
            overpressure_latched: ctx.overpressure_latched,
            last_verdict: ctx.last_verdict,
        }
    }

    fn check_pressure(&mut self, phase: TestPhase) -> Option<Trip> {
        let limit = self.ctx.config.safety.overshoot_limit_psi;

        if phase == TestPhase::Testing && self.acquisition.is_streaming() {
            if self.acquisition.take_fault().is_some() {
                return Some(Trip::new(ErrorReason::HardwareFault));
            }
            if let Some(sample) = self.acquisition.overshoot() {
                self.ctx.observe_pressure(sample.pressure_psi);
                return Some(Trip::at(ErrorReason::Overpressure, sample.pressure_psi));
            }
            if let Some(sample) = self.acquisition.latest() {
                self.ctx.observe_pressure(sample.pressure_psi);
            }
            return None;
        }

        match self.acquisition.read_fast() {
            Ok(sample) => {
                self.ctx.observe_pressure(sample.pressure_psi);
                if phase == TestPhase::Filling
                    && sample.pressure_psi >= self.ctx.config.pressure.min_test_psi
                {
                    self.ctx.fill_reached = true;
                }
                (sample.pressure_psi > limit)
                    .then(|| Trip::at(ErrorReason::Overpressure, sample.pressure_psi))
            }
            Err(_) => Some(Trip::new(ErrorReason::HardwareFault)),
        }
    }

    fn advance(&mut self, now: Instant) {
        while let SequencerState::Running(phase) = self.ctx.state {
            match self.step(phase, now) {
                Ok(Step::Hold) => break,
                Ok(Step::Advance(next)) => {
                    self.emit(now, TestEvent::PhaseExited(phase));
                    self.enter(next, now);
                }
                Ok(Step::Conclude(verdict)) => {
                    self.emit(now, TestEvent::PhaseExited(phase));
                    self.conclude(verdict, now);
                }
                Err(trip) => self.emergency_stop(trip, now),
            }
        }
    }

    fn step(&mut self, phase: TestPhase, now: Instant) -> Result<Step, Trip> {
        let plan = step_for(phase);
        let hold = self.ctx.config.timing.hold_for(phase);
        let held_long_enough = self
            .ctx
            .phase_started_at
            .is_some_and(|started| now.saturating_duration_since(started) >= hold);

        match plan.completion {
            PhaseCompletion::AfterHold if !held_long_enough => Ok(Step::Hold),
            PhaseCompletion::AfterHold if phase == TestPhase::Filling => self.finish_fill(now),
            PhaseCompletion::AfterHold | PhaseCompletion::Immediate => {
                Ok(phase.next().map_or(Step::Hold, Step::Advance))
            }
            PhaseCompletion::AfterWindow if !held_long_enough => Ok(Step::Hold),
            PhaseCompletion::AfterWindow => {
                let window = self.acquisition.stop();
                self.sink.record_window(self.ctx.run, &window);
                self.ctx.window = Some(window);
                Ok(phase.next().map_or(Step::Hold, Step::Advance))
            }
            PhaseCompletion::OnVerdict => Ok(Step::Conclude(self.verdict())),
        }
    }

    /// Decides between moving on, cycling the fill valve, and giving up.
    fn finish_fill(&mut self, now: Instant) -> Result<Step, Trip> {
        if self.ctx.fill_reached {
            return Ok(Step::Advance(TestPhase::Stabilizing));
        }

        if self.ctx.fill_attempts < self.ctx.config.safety.max_fill_attempts {
            self.bank
                .set(OutputId::Fill, false)
                .map_err(|_| Trip::new(ErrorReason::HardwareFault))?;
            self.bank
                .set(OutputId::Fill, true)
                .map_err(|_| Trip::new(ErrorReason::HardwareFault))?;
            self.ctx.fill_attempts += 1;
            self.ctx.phase_started_at = Some(now);
            self.ctx.attempt_started_at = Some(now);
            let attempt = self.ctx.fill_attempts;
            self.emit(now, TestEvent::FillRetry { attempt });
            return Ok(Step::Hold);
        }

        // Out of attempts: vent and unclamp, then report the failure.
        self.ctx.pending_failure = Some(FailReason::FillPressureNotReached);
        Ok(Step::Advance(TestPhase::Exhausting))
    }

    fn verdict(&self) -> Verdict {
        if let Some(reason) = self.ctx.pending_failure {
            return Verdict::without_window(Outcome::Fail(reason))
                .with_peak(self.ctx.peak_pressure_psi);
        }

        match &self.ctx.window {
            Some(window) => {
                evaluator::evaluate(window, &EvaluationCriteria::from_config(&self.ctx.config))
            }
            None => Verdict::without_window(Outcome::Error(ErrorReason::InsufficientSamples))
                .with_peak(self.ctx.peak_pressure_psi),
        }
    }

    fn enter(&mut self, phase: TestPhase, now: Instant) {
        self.ctx.state = SequencerState::Running(phase);
        self.ctx.phase_started_at = Some(now);
        self.ctx.attempt_started_at = Some(now);
        self.emit(now, TestEvent::PhaseEntered(phase));

        if let Err(trip) = self.apply_phase(phase) {
            self.emergency_stop(trip, now);
        }
    }

    fn apply_phase(&mut self, phase: TestPhase) -> Result<(), Trip> {
        self.bank
            .apply(step_for(phase).outputs)
            .map_err(|_| Trip::new(ErrorReason::HardwareFault))?;

        match phase {
            TestPhase::Filling => {
                self.ctx.fill_attempts = 1;
                self.ctx.fill_reached = false;
            }
            TestPhase::Testing => {
                let config = &self.ctx.config;
                let request = StreamRequest::new(
                    config.acquisition.target_rate_hz,
                    config.acquisition.buffer_capacity,
                )
                .with_trip(config.safety.overshoot_limit_psi);
                self.acquisition.start(request).map_err(|error| {
                    Trip::new(match error {
                        AcquisitionError::Hardware(_) => ErrorReason::HardwareFault,
                        _ => ErrorReason::AcquisitionRejected,
                    })
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    fn conclude(&mut self, verdict: Verdict, now: Instant) {
        if self.bank.force_all_off().is_err() {
            self.emergency_stop(Trip::new(ErrorReason::HardwareFault), now);
            return;
        }
        self.ctx.state = SequencerState::Complete(verdict.outcome);
        self.ctx.last_verdict = Some(verdict);
        self.emit(now, TestEvent::Verdict(verdict));
    }

    /// Forces every output off and ends the run with `Error(trip.reason)`.
    fn emergency_stop(&mut self, trip: Trip, now: Instant) {
        let phase = self.ctx.state.phase();
        let _ = self.bank.force_all_off();
        if self.acquisition.is_streaming() {
            let _ = self.acquisition.stop();
        }
        if trip.reason == ErrorReason::Overpressure {
            self.ctx.overpressure_latched = true;
        }
        self.ctx.abort_requested = false;

        self.emit(
            now,
            TestEvent::SafetyTrip {
                reason: trip.reason,
                phase,
                pressure_psi: trip.pressure_psi,
            },
        );

        let verdict = Verdict::without_window(Outcome::Error(trip.reason))
            .with_peak(self.ctx.peak_pressure_psi);
        self.ctx.state = SequencerState::EmergencyStop(trip.reason);
        self.ctx.last_verdict = Some(verdict);
        self.emit(now, TestEvent::Verdict(verdict));
    }

    fn emit(&mut self, timestamp: Instant, event: TestEvent) {
        let record = EventRecord {
            id: self.ctx.take_event_id(),
            run: self.ctx.run,
            timestamp,
            event,
        };
        self.sink.emit(&record);
    }
}
