//! Per-test configuration snapshot.
//!
//! A [`TestConfig`] is captured when a test starts and never changes while the
//! test runs. Defaults describe the reference fixture: a 0-1 psi transducer on
//! a 4-20 mA loop read by an ADS1115.

use core::fmt;
use core::time::Duration;

use crate::hardware::ADS1115_MAX_RATE_HZ;
use crate::pneumatics::TestPhase;

/// Upper bound on the sequencer poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_EXTEND_TIME: Duration = Duration::from_secs(3);
pub const DEFAULT_FILL_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_STABILIZE_TIME: Duration = Duration::from_secs(10);
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_EXHAUST_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRACT_TIME: Duration = Duration::from_secs(3);
pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of recent samples used for the achieved-rate estimate.
pub const DEFAULT_RATE_WINDOW: usize = 50;

/// Phase durations.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingConfig {
    pub extend: Duration,
    pub fill: Duration,
    pub stabilize: Duration,
    pub test: Duration,
    pub exhaust: Duration,
    pub retract: Duration,
}

impl TimingConfig {
    /// Hold duration for a phase; untimed phases report [`Duration::ZERO`].
    #[must_use]
    pub const fn hold_for(&self, phase: TestPhase) -> Duration {
        match phase {
            TestPhase::Extending => self.extend,
            TestPhase::Filling => self.fill,
            TestPhase::Stabilizing => self.stabilize,
            TestPhase::Testing => self.test,
            TestPhase::Exhausting => self.exhaust,
            TestPhase::Retracting => self.retract,
            TestPhase::Isolating | TestPhase::Evaluating => Duration::ZERO,
        }
    }

    /// Nominal duration of a test that passes every phase on the first attempt.
    #[must_use]
    pub fn nominal_total(&self) -> Duration {
        self.extend + self.fill + self.stabilize + self.test + self.exhaust + self.retract
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            extend: DEFAULT_EXTEND_TIME,
            fill: DEFAULT_FILL_TIME,
            stabilize: DEFAULT_STABILIZE_TIME,
            test: DEFAULT_TEST_DURATION,
            exhaust: DEFAULT_EXHAUST_TIME,
            retract: DEFAULT_RETRACT_TIME,
        }
    }
}

/// Pressure acceptance thresholds, psi and psi/s.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PressureThresholds {
    pub target_fill_psi: f64,
    pub tolerance_psi: f64,
    pub max_leak_rate_psi_per_s: f64,
    pub min_test_psi: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            target_fill_psi: 0.8,
            tolerance_psi: 0.05,
            max_leak_rate_psi_per_s: 0.005,
            min_test_psi: 0.1,
        }
    }
}

/// Safety interlock limits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SafetyLimits {
    pub overshoot_limit_psi: f64,
    pub max_fill_attempts: u8,
    pub safety_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            overshoot_limit_psi: 0.95,
            max_fill_attempts: 3,
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Acquisition pipeline parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AcquisitionSettings {
    pub target_rate_hz: u32,
    pub buffer_capacity: usize,
    pub rate_window: usize,
    /// Shortest acceptable window span as a fraction of the test duration.
    pub min_window_fraction: f64,
    pub burst_count: u32,
    pub burst_rate_hz: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            target_rate_hz: 250,
            buffer_capacity: 16_384,
            rate_window: DEFAULT_RATE_WINDOW,
            min_window_fraction: 0.9,
            burst_count: 50,
            burst_rate_hz: 250,
        }
    }
}

/// Immutable per-test configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TestConfig {
    pub timing: TimingConfig,
    pub pressure: PressureThresholds,
    pub safety: SafetyLimits,
    pub acquisition: AcquisitionSettings,
}

impl TestConfig {
    /// Checks every cross-field rule against the sensor's rate ceiling.
    pub fn validate(&self, max_rate_hz: u32) -> Result<(), ConfigError> {
        let acquisition = &self.acquisition;
        if acquisition.target_rate_hz == 0 || acquisition.target_rate_hz > max_rate_hz {
            return Err(ConfigError::RateOutOfRange {
                requested: acquisition.target_rate_hz,
                max: max_rate_hz,
            });
        }
        if acquisition.burst_rate_hz == 0 || acquisition.burst_rate_hz > max_rate_hz {
            return Err(ConfigError::RateOutOfRange {
                requested: acquisition.burst_rate_hz,
                max: max_rate_hz,
            });
        }
        if acquisition.buffer_capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        if acquisition.rate_window < 2 {
            return Err(ConfigError::RateWindowTooSmall);
        }
        if !positive(acquisition.min_window_fraction) || acquisition.min_window_fraction > 1.0 {
            return Err(ConfigError::WindowFractionOutOfRange);
        }

        let safety = &self.safety;
        if safety.poll_interval.is_zero() || safety.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::PollIntervalOutOfRange);
        }
        if safety.max_fill_attempts == 0 {
            return Err(ConfigError::NoFillAttempts);
        }

        for phase in [
            TestPhase::Extending,
            TestPhase::Filling,
            TestPhase::Stabilizing,
            TestPhase::Testing,
            TestPhase::Exhausting,
            TestPhase::Retracting,
        ] {
            let hold = self.timing.hold_for(phase);
            if hold.is_zero() {
                return Err(ConfigError::ZeroDuration(phase));
            }
            if hold >= safety.safety_timeout {
                return Err(ConfigError::PhaseExceedsSafetyTimeout(phase));
            }
        }

        let pressure = &self.pressure;
        if !positive(pressure.max_leak_rate_psi_per_s) {
            return Err(ConfigError::NonPositiveLeakRate);
        }
        if !positive(pressure.tolerance_psi) {
            return Err(ConfigError::NonPositiveTolerance);
        }
        if pressure.min_test_psi.is_nan()
            || pressure.min_test_psi < 0.0
            || !positive(pressure.target_fill_psi - pressure.min_test_psi)
        {
            return Err(ConfigError::TargetBelowMinimum);
        }
        if !positive(safety.overshoot_limit_psi - (pressure.target_fill_psi + pressure.tolerance_psi)) {
            return Err(ConfigError::OvershootBelowTarget);
        }

        Ok(())
    }

    /// Validates against the ADS1115 rate ceiling.
    pub fn validate_default_sensor(&self) -> Result<(), ConfigError> {
        self.validate(ADS1115_MAX_RATE_HZ)
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// First configuration rule a [`TestConfig`] violates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    RateOutOfRange { requested: u32, max: u32 },
    ZeroBufferCapacity,
    RateWindowTooSmall,
    WindowFractionOutOfRange,
    PollIntervalOutOfRange,
    NoFillAttempts,
    ZeroDuration(TestPhase),
    PhaseExceedsSafetyTimeout(TestPhase),
    NonPositiveLeakRate,
    NonPositiveTolerance,
    TargetBelowMinimum,
    OvershootBelowTarget,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RateOutOfRange { requested, max } => {
                write!(f, "sample rate {requested} SPS outside 1..={max}")
            }
            ConfigError::ZeroBufferCapacity => f.write_str("buffer capacity must be non-zero"),
            ConfigError::RateWindowTooSmall => f.write_str("rate window needs at least 2 samples"),
            ConfigError::WindowFractionOutOfRange => {
                f.write_str("minimum window fraction must be in (0, 1]")
            }
            ConfigError::PollIntervalOutOfRange => {
                write!(
                    f,
                    "poll interval must be between 1 and {} ms",
                    MAX_POLL_INTERVAL.as_millis()
                )
            }
            ConfigError::NoFillAttempts => f.write_str("at least one fill attempt is required"),
            ConfigError::ZeroDuration(phase) => write!(f, "{phase} duration must be non-zero"),
            ConfigError::PhaseExceedsSafetyTimeout(phase) => {
                write!(f, "{phase} duration must be shorter than the safety timeout")
            }
            ConfigError::NonPositiveLeakRate => f.write_str("max leak rate must be positive"),
            ConfigError::NonPositiveTolerance => f.write_str("pressure tolerance must be positive"),
            ConfigError::TargetBelowMinimum => {
                f.write_str("target fill pressure must exceed the minimum test pressure")
            }
            ConfigError::OvershootBelowTarget => {
                f.write_str("overshoot limit must exceed target pressure plus tolerance")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = TestConfig::default();
        assert_eq!(config.validate_default_sensor(), Ok(()));
        assert_eq!(config.timing.nominal_total(), Duration::from_secs(56));
        assert_eq!(config.safety.max_fill_attempts, 3);
    }

    #[test]
    fn rejects_rates_beyond_sensor_ceiling() {
        let mut config = TestConfig::default();
        config.acquisition.target_rate_hz = 861;
        assert_eq!(
            config.validate_default_sensor(),
            Err(ConfigError::RateOutOfRange {
                requested: 861,
                max: 860
            })
        );

        config.acquisition.target_rate_hz = 0;
        assert!(matches!(
            config.validate_default_sensor(),
            Err(ConfigError::RateOutOfRange { requested: 0, .. })
        ));
    }

    #[test]
    fn rejects_phase_longer_than_safety_timeout() {
        let mut config = TestConfig::default();
        config.timing.test = Duration::from_secs(90);
        assert_eq!(
            config.validate_default_sensor(),
            Err(ConfigError::PhaseExceedsSafetyTimeout(TestPhase::Testing))
        );
    }

    #[test]
    fn rejects_slow_poll_interval() {
        let mut config = TestConfig::default();
        config.safety.poll_interval = Duration::from_millis(250);
        assert_eq!(
            config.validate_default_sensor(),
            Err(ConfigError::PollIntervalOutOfRange)
        );
    }

    #[test]
    fn rejects_overshoot_inside_acceptance_band() {
        let mut config = TestConfig::default();
        config.safety.overshoot_limit_psi = 0.82;
        assert_eq!(
            config.validate_default_sensor(),
            Err(ConfigError::OvershootBelowTarget)
        );
    }

    #[test]
    fn rejects_nan_thresholds() {
        let mut config = TestConfig::default();
        config.pressure.max_leak_rate_psi_per_s = f64::NAN;
        assert_eq!(
            config.validate_default_sensor(),
            Err(ConfigError::NonPositiveLeakRate)
        );
    }

    #[test]
    fn hold_for_maps_every_timed_phase() {
        let timing = TimingConfig::default();
        assert_eq!(timing.hold_for(TestPhase::Filling), DEFAULT_FILL_TIME);
        assert_eq!(timing.hold_for(TestPhase::Isolating), Duration::ZERO);
        assert_eq!(timing.hold_for(TestPhase::Evaluating), Duration::ZERO);
    }
}
