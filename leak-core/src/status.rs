//! Read-only status surface.
//!
//! The sequencer publishes a [`SequencerSnapshot`] for displays and logs.
//! [`StatusFormatter`] keeps the textual rendering identical across the
//! station log and the operator console.

use core::fmt;
use core::time::Duration;

use crate::evaluator::Verdict;
use crate::pneumatics::{ALL_OUTPUTS, ActuatorState};
use crate::sequencer::SequencerState;
use crate::telemetry::RunId;

/// Point-in-time copy of the sequencer's observable state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SequencerSnapshot {
    pub state: SequencerState,
    pub run: RunId,
    pub phase_elapsed: Option<Duration>,
    pub run_elapsed: Option<Duration>,
    pub fill_attempts: u8,
    pub max_fill_attempts: u8,
    pub pressure_psi: Option<f64>,
    pub peak_pressure_psi: Option<f64>,
    pub target_fill_psi: f64,
    pub achieved_rate_hz: f64,
    pub streaming: bool,
    pub actuators: ActuatorState,
    pub actuators_confirmed_off: bool,
    pub overpressure_latched: bool,
    pub last_verdict: Option<Verdict>,
}

impl SequencerSnapshot {
    /// Snapshot of a sequencer that has never run.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            state: SequencerState::Idle,
            run: 0,
            phase_elapsed: None,
            run_elapsed: None,
            fill_attempts: 0,
            max_fill_attempts: 0,
            pressure_psi: None,
            peak_pressure_psi: None,
            target_fill_psi: 0.0,
            achieved_rate_hz: 0.0,
            streaming: false,
            actuators: ActuatorState::ALL_OFF,
            actuators_confirmed_off: false,
            overpressure_latched: false,
            last_verdict: None,
        }
    }

    /// Returns `true` when a start request would not be refused for safety reasons.
    #[must_use]
    pub const fn ready(&self) -> bool {
        !self.state.is_running() && self.actuators_confirmed_off && !self.overpressure_latched
    }
}

impl Default for SequencerSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Renders a [`SequencerSnapshot`] as short `key=value` lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a SequencerSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a SequencerSnapshot) -> Self {
        Self { snapshot }
    }

    /// `state testing run=3 phase=+4.2s total=+22.0s fill=1/3`
    pub fn write_state_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(writer, "state {} run={}", snapshot.state.label(), snapshot.run)?;
        if let SequencerState::EmergencyStop(reason) = snapshot.state {
            write!(writer, " reason={}", reason.label())?;
        }
        if let Some(elapsed) = snapshot.phase_elapsed {
            writer.write_str(" phase=")?;
            write_duration(writer, elapsed)?;
        }
        if let Some(elapsed) = snapshot.run_elapsed {
            writer.write_str(" total=")?;
            write_duration(writer, elapsed)?;
        }
        if snapshot.fill_attempts > 0 {
            write!(
                writer,
                " fill={}/{}",
                snapshot.fill_attempts, snapshot.max_fill_attempts
            )?;
        }
        Ok(())
    }

    /// `pressure now=0.512psi peak=0.540psi target=0.800psi rate=249.8sps`
    pub fn write_pressure_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        writer.write_str("pressure now=")?;
        write_psi(writer, snapshot.pressure_psi)?;
        writer.write_str(" peak=")?;
        write_psi(writer, snapshot.peak_pressure_psi)?;
        write!(writer, " target={:.3}psi", snapshot.target_fill_psi)?;
        if snapshot.streaming {
            write!(writer, " rate={:.1}sps", snapshot.achieved_rate_hz)?;
        }
        Ok(())
    }

    /// `outputs fill=on exhaust=off extend=off retract=off verified=false latched=false`
    pub fn write_outputs_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("outputs")?;
        for line in &ALL_OUTPUTS {
            let level = if self.snapshot.actuators.is_on(line.id) {
                "on"
            } else {
                "off"
            };
            write!(writer, " {}={level}", line.id.label())?;
        }
        write!(
            writer,
            " verified={} latched={}",
            self.snapshot.actuators_confirmed_off, self.snapshot.overpressure_latched
        )
    }

    /// `verdict PASS rate=-0.0040psi/s peak=0.520psi samples=7500 gaps=0`
    pub fn write_verdict_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match &self.snapshot.last_verdict {
            Some(verdict) => write_verdict(writer, verdict),
            None => writer.write_str("verdict none"),
        }
    }
}

/// Single-line rendering of a verdict, shared with result logs.
pub fn write_verdict<W: fmt::Write>(writer: &mut W, verdict: &Verdict) -> fmt::Result {
    write!(writer, "verdict {}", verdict.outcome)?;
    if let Some(rate) = verdict.leak_rate_psi_per_s {
        write!(writer, " rate={rate:.4}psi/s")?;
    }
    writer.write_str(" peak=")?;
    write_psi(writer, verdict.peak_pressure_psi)?;
    write!(
        writer,
        " samples={} gaps={}",
        verdict.sample_count, verdict.sequence_gaps
    )
}

fn write_psi<W: fmt::Write>(writer: &mut W, pressure: Option<f64>) -> fmt::Result {
    match pressure {
        Some(psi) => write!(writer, "{psi:.3}psi"),
        None => writer.write_str("n/a"),
    }
}

fn write_duration<W: fmt::Write>(writer: &mut W, value: Duration) -> fmt::Result {
    if value >= Duration::from_secs(1) {
        let millis = value.as_millis();
        write!(writer, "+{}.{}s", millis / 1_000, (millis % 1_000) / 100)
    } else {
        write!(writer, "+{}ms", value.as_millis())
    }
}
