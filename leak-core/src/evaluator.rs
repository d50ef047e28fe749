//! Decay-rate evaluation of a sealed test window.
//!
//! [`evaluate`] is a pure function of its inputs: samples are visited in
//! window order with a fixed two-pass least-squares fit, so identical windows
//! always produce bit-identical verdicts.

use core::fmt;
use core::time::Duration;

use crate::acquisition::SampleWindow;
use crate::config::TestConfig;

/// Thresholds the evaluator applies to a window.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EvaluationCriteria {
    pub target_fill_psi: f64,
    pub tolerance_psi: f64,
    pub max_leak_rate_psi_per_s: f64,
    pub test_duration: Duration,
    pub min_window_fraction: f64,
}

impl EvaluationCriteria {
    #[must_use]
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            target_fill_psi: config.pressure.target_fill_psi,
            tolerance_psi: config.pressure.tolerance_psi,
            max_leak_rate_psi_per_s: config.pressure.max_leak_rate_psi_per_s,
            test_duration: config.timing.test,
            min_window_fraction: config.acquisition.min_window_fraction,
        }
    }

    /// Shortest window span that still counts as a full measurement.
    #[must_use]
    pub fn min_span_secs(&self) -> f64 {
        self.test_duration.as_secs_f64() * self.min_window_fraction
    }
}

impl From<&TestConfig> for EvaluationCriteria {
    fn from(config: &TestConfig) -> Self {
        Self::from_config(config)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FailReason {
    LeakRateExceeded,
    FillPressureNotReached,
}

impl FailReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            FailReason::LeakRateExceeded => "leak-rate-exceeded",
            FailReason::FillPressureNotReached => "fill-pressure-not-reached",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorReason {
    HardwareFault,
    Overpressure,
    PhaseTimeout,
    Aborted,
    InsufficientSamples,
    StartingPressureOutOfRange,
    /// The pipeline refused to start the Testing window.
    AcquisitionRejected,
}

impl ErrorReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ErrorReason::HardwareFault => "hardware-fault",
            ErrorReason::Overpressure => "overpressure",
            ErrorReason::PhaseTimeout => "phase-timeout",
            ErrorReason::Aborted => "aborted",
            ErrorReason::InsufficientSamples => "insufficient-samples",
            ErrorReason::StartingPressureOutOfRange => "starting-pressure-out-of-range",
            ErrorReason::AcquisitionRejected => "acquisition-rejected",
        }
    }
}

/// Terminal classification of a test run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    Pass,
    Fail(FailReason),
    Error(ErrorReason),
}

impl Outcome {
    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Outcome::Pass)
    }

    /// Short upper-case result word for operator displays and CSV rows.
    #[must_use]
    pub const fn headline(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail(_) => "FAIL",
            Outcome::Error(_) => "ERROR",
        }
    }

    #[must_use]
    pub const fn reason_label(self) -> Option<&'static str> {
        match self {
            Outcome::Pass => None,
            Outcome::Fail(reason) => Some(reason.label()),
            Outcome::Error(reason) => Some(reason.label()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason_label() {
            Some(reason) => write!(f, "{}({reason})", self.headline()),
            None => f.write_str(self.headline()),
        }
    }
}

/// Result of one test run, immutable once produced.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Fitted slope in psi/s; negative while pressure drops.
    pub leak_rate_psi_per_s: Option<f64>,
    pub peak_pressure_psi: Option<f64>,
    pub start_pressure_psi: Option<f64>,
    pub end_pressure_psi: Option<f64>,
    pub sample_count: usize,
    pub sequence_gaps: u64,
}

impl Verdict {
    /// Verdict that carries the window statistics but no fitted rate.
    #[must_use]
    pub fn from_window(outcome: Outcome, window: &SampleWindow) -> Self {
        Self {
            outcome,
            leak_rate_psi_per_s: None,
            peak_pressure_psi: window.peak_pressure(),
            start_pressure_psi: window.first().map(|sample| sample.pressure_psi),
            end_pressure_psi: window.last().map(|sample| sample.pressure_psi),
            sample_count: window.len(),
            sequence_gaps: window.sequence_gaps(),
        }
    }

    /// Verdict for a run that ended before any window was measured.
    #[must_use]
    pub const fn without_window(outcome: Outcome) -> Self {
        Self {
            outcome,
            leak_rate_psi_per_s: None,
            peak_pressure_psi: None,
            start_pressure_psi: None,
            end_pressure_psi: None,
            sample_count: 0,
            sequence_gaps: 0,
        }
    }

    #[must_use]
    pub const fn with_peak(mut self, peak_psi: Option<f64>) -> Self {
        self.peak_pressure_psi = peak_psi;
        self
    }

    /// Total pressure lost between the first and last sample.
    #[must_use]
    pub fn pressure_drop_psi(&self) -> Option<f64> {
        Some(self.start_pressure_psi? - self.end_pressure_psi?)
    }
}

/// Classifies `window` against `criteria`.
#[must_use]
pub fn evaluate(window: &SampleWindow, criteria: &EvaluationCriteria) -> Verdict {
    let insufficient = Verdict::from_window(Outcome::Error(ErrorReason::InsufficientSamples), window);
    if window.len() < 2 || window.span().as_secs_f64() < criteria.min_span_secs() {
        return insufficient;
    }

    let Some(first) = window.first() else {
        return insufficient;
    };
    if (first.pressure_psi - criteria.target_fill_psi).abs() > criteria.tolerance_psi {
        return Verdict::from_window(
            Outcome::Error(ErrorReason::StartingPressureOutOfRange),
            window,
        );
    }

    let Some(slope) = decay_slope(window) else {
        return insufficient;
    };

    let outcome = if slope.abs() <= criteria.max_leak_rate_psi_per_s {
        Outcome::Pass
    } else {
        Outcome::Fail(FailReason::LeakRateExceeded)
    };

    Verdict {
        leak_rate_psi_per_s: Some(slope),
        ..Verdict::from_window(outcome, window)
    }
}

/// Least-squares slope of pressure against seconds since the first sample.
///
/// Returns `None` when every sample shares one timestamp.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decay_slope(window: &SampleWindow) -> Option<f64> {
    let origin = window.first()?.timestamp;
    let count = window.len() as f64;

    let (sum_t, sum_p) = window.iter().fold((0.0, 0.0), |(t, p), sample| {
        (t + sample.timestamp.seconds_since(origin), p + sample.pressure_psi)
    });
    let mean_t = sum_t / count;
    let mean_p = sum_p / count;

    let (sxx, sxy) = window.iter().fold((0.0, 0.0), |(sxx, sxy), sample| {
        let dt = sample.timestamp.seconds_since(origin) - mean_t;
        let dp = sample.pressure_psi - mean_p;
        (sxx + dt * dt, sxy + dt * dp)
    });

    if sxx <= 0.0 {
        return None;
    }
    Some(sxy / sxx)
}
