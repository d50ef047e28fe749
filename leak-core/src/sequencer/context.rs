//! Live state carried by the sequencer between polls.

use crate::acquisition::SampleWindow;
use crate::config::TestConfig;
use crate::evaluator::{ErrorReason, FailReason, Outcome, Verdict};
use crate::pneumatics::TestPhase;
use crate::telemetry::{EventId, RunId};
use crate::time::Instant;

/// Top-level sequencer state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerState {
    Idle,
    Running(TestPhase),
    /// Outputs were forced off; the run ended with `Error(reason)`.
    EmergencyStop(ErrorReason),
    /// The run concluded normally with this outcome.
    Complete(Outcome),
}

impl SequencerState {
    #[must_use]
    pub const fn phase(self) -> Option<TestPhase> {
        match self {
            SequencerState::Running(phase) => Some(phase),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, SequencerState::Running(_))
    }

    /// Returns `true` for the states that fall back to [`SequencerState::Idle`] on the next poll.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SequencerState::EmergencyStop(_) | SequencerState::Complete(_)
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SequencerState::Idle => "idle",
            SequencerState::Running(phase) => phase.label(),
            SequencerState::EmergencyStop(_) => "emergency-stop",
            SequencerState::Complete(_) => "complete",
        }
    }
}

/// Everything the sequencer tracks for the current and most recent run.
#[derive(Clone, Debug)]
pub struct SequencerContext {
    pub(crate) state: SequencerState,
    pub(crate) config: TestConfig,
    pub(crate) run: RunId,
    pub(crate) run_started_at: Option<Instant>,
    pub(crate) phase_started_at: Option<Instant>,
    /// Start of the current attempt at the current phase; the safety timeout runs from here.
    pub(crate) attempt_started_at: Option<Instant>,
    pub(crate) fill_attempts: u8,
    pub(crate) fill_reached: bool,
    pub(crate) pending_failure: Option<FailReason>,
    pub(crate) window: Option<SampleWindow>,
    pub(crate) last_pressure_psi: Option<f64>,
    pub(crate) peak_pressure_psi: Option<f64>,
    pub(crate) last_verdict: Option<Verdict>,
    pub(crate) overpressure_latched: bool,
    pub(crate) abort_requested: bool,
    pub(crate) next_event_id: EventId,
}

impl SequencerContext {
    pub(crate) fn new(config: TestConfig) -> Self {
        Self {
            state: SequencerState::Idle,
            config,
            run: 0,
            run_started_at: None,
            phase_started_at: None,
            attempt_started_at: None,
            fill_attempts: 0,
            fill_reached: false,
            pending_failure: None,
            window: None,
            last_pressure_psi: None,
            peak_pressure_psi: None,
            last_verdict: None,
            overpressure_latched: false,
            abort_requested: false,
            next_event_id: 0,
        }
    }

    /// Clears per-run fields and opens run `run`.
    pub(crate) fn begin_run(&mut self, now: Instant) -> RunId {
        self.run = self.run.wrapping_add(1);
        self.run_started_at = Some(now);
        self.phase_started_at = None;
        self.attempt_started_at = None;
        self.fill_attempts = 0;
        self.fill_reached = false;
        self.pending_failure = None;
        self.window = None;
        self.peak_pressure_psi = None;
        self.abort_requested = false;
        self.run
    }

    /// Folds a pressure observation into the running statistics.
    pub(crate) fn observe_pressure(&mut self, pressure_psi: f64) {
        self.last_pressure_psi = Some(pressure_psi);
        self.peak_pressure_psi = Some(
            self.peak_pressure_psi
                .map_or(pressure_psi, |peak| peak.max(pressure_psi)),
        );
    }

    pub(crate) fn take_event_id(&mut self) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        id
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn fill_attempts(&self) -> u8 {
        self.fill_attempts
    }

    /// Sealed window of the most recent run, once Testing has finished.
    pub fn window(&self) -> Option<&SampleWindow> {
        self.window.as_ref()
    }

    pub fn last_verdict(&self) -> Option<&Verdict> {
        self.last_verdict.as_ref()
    }

    pub fn last_pressure_psi(&self) -> Option<f64> {
        self.last_pressure_psi
    }

    pub fn peak_pressure_psi(&self) -> Option<f64> {
        self.peak_pressure_psi
    }

    pub fn overpressure_latched(&self) -> bool {
        self.overpressure_latched
    }

    pub fn run_started_at(&self) -> Option<Instant> {
        self.run_started_at
    }

    pub fn phase_started_at(&self) -> Option<Instant> {
        self.phase_started_at
    }
}
