//! TOML settings file.
//!
//! Durations are written as seconds, pressures as psi and rates as samples
//! per second. Every field is optional; omitted ones take the reference rig
//! defaults from [`leak_core::config`].
//!
//! ```toml
//! [timing]
//! fill = 6.5
//!
//! [pressure]
//! target_fill_psi = 0.75
//!
//! [station]
//! results_dir = "/var/lib/leak-station"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use leak_core::calibration::{CalibrationPoint, CalibrationTable, TableCalibration, TwoPointCalibration};
use leak_core::config::{
    AcquisitionSettings, PressureThresholds, SafetyLimits, TestConfig, TimingConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::pipeline::Converter;

/// Default `tracing` filter for the station and its front-ends.
pub const DEFAULT_LOG_FILTER: &str = "station=info,rig_emulator=info";

/// Complete settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub timing: TimingSection,
    pub pressure: PressureSection,
    pub safety: SafetySection,
    pub acquisition: AcquisitionSection,
    pub calibration: CalibrationSection,
    pub station: StationSection,
}

impl Settings {
    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validated per-test configuration described by these settings.
    pub fn test_config(&self) -> Result<TestConfig, SettingsError> {
        TestConfig::try_from(self)
    }

    /// Raw-count converter for the installed transducer.
    pub fn converter(&self) -> Result<Converter, SettingsError> {
        self.calibration.converter()
    }
}

impl TryFrom<&Settings> for TestConfig {
    type Error = SettingsError;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        let config = TestConfig {
            timing: settings.timing.to_config()?,
            pressure: settings.pressure.to_config(),
            safety: settings.safety.to_config()?,
            acquisition: settings.acquisition.to_config(),
        };
        config.validate_default_sensor()?;
        Ok(config)
    }
}

/// Phase durations, seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSection {
    pub extend: f64,
    pub fill: f64,
    pub stabilize: f64,
    pub test: f64,
    pub exhaust: f64,
    pub retract: f64,
}

impl TimingSection {
    fn to_config(&self) -> Result<TimingConfig, SettingsError> {
        Ok(TimingConfig {
            extend: seconds("timing.extend", self.extend)?,
            fill: seconds("timing.fill", self.fill)?,
            stabilize: seconds("timing.stabilize", self.stabilize)?,
            test: seconds("timing.test", self.test)?,
            exhaust: seconds("timing.exhaust", self.exhaust)?,
            retract: seconds("timing.retract", self.retract)?,
        })
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        let timing = TimingConfig::default();
        Self {
            extend: timing.extend.as_secs_f64(),
            fill: timing.fill.as_secs_f64(),
            stabilize: timing.stabilize.as_secs_f64(),
            test: timing.test.as_secs_f64(),
            exhaust: timing.exhaust.as_secs_f64(),
            retract: timing.retract.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PressureSection {
    pub target_fill_psi: f64,
    pub tolerance_psi: f64,
    pub max_leak_rate_psi_per_s: f64,
    pub min_test_psi: f64,
}

impl PressureSection {
    fn to_config(&self) -> PressureThresholds {
        PressureThresholds {
            target_fill_psi: self.target_fill_psi,
            tolerance_psi: self.tolerance_psi,
            max_leak_rate_psi_per_s: self.max_leak_rate_psi_per_s,
            min_test_psi: self.min_test_psi,
        }
    }
}

impl Default for PressureSection {
    fn default() -> Self {
        let pressure = PressureThresholds::default();
        Self {
            target_fill_psi: pressure.target_fill_psi,
            tolerance_psi: pressure.tolerance_psi,
            max_leak_rate_psi_per_s: pressure.max_leak_rate_psi_per_s,
            min_test_psi: pressure.min_test_psi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetySection {
    pub overshoot_limit_psi: f64,
    pub max_fill_attempts: u8,
    /// Seconds.
    pub safety_timeout: f64,
    /// Seconds.
    pub poll_interval: f64,
}

impl SafetySection {
    fn to_config(&self) -> Result<SafetyLimits, SettingsError> {
        Ok(SafetyLimits {
            overshoot_limit_psi: self.overshoot_limit_psi,
            max_fill_attempts: self.max_fill_attempts,
            safety_timeout: seconds("safety.safety_timeout", self.safety_timeout)?,
            poll_interval: seconds("safety.poll_interval", self.poll_interval)?,
        })
    }
}

impl Default for SafetySection {
    fn default() -> Self {
        let safety = SafetyLimits::default();
        Self {
            overshoot_limit_psi: safety.overshoot_limit_psi,
            max_fill_attempts: safety.max_fill_attempts,
            safety_timeout: safety.safety_timeout.as_secs_f64(),
            poll_interval: safety.poll_interval.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionSection {
    pub target_rate_hz: u32,
    pub buffer_capacity: usize,
    pub rate_window: usize,
    pub min_window_fraction: f64,
    pub burst_count: u32,
    pub burst_rate_hz: u32,
}

impl AcquisitionSection {
    fn to_config(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            target_rate_hz: self.target_rate_hz,
            buffer_capacity: self.buffer_capacity,
            rate_window: self.rate_window,
            min_window_fraction: self.min_window_fraction,
            burst_count: self.burst_count,
            burst_rate_hz: self.burst_rate_hz,
        }
    }
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        let acquisition = AcquisitionSettings::default();
        Self {
            target_rate_hz: acquisition.target_rate_hz,
            buffer_capacity: acquisition.buffer_capacity,
            rate_window: acquisition.rate_window,
            min_window_fraction: acquisition.min_window_fraction,
            burst_count: acquisition.burst_count,
            burst_rate_hz: acquisition.burst_rate_hz,
        }
    }
}

/// Transducer calibration.
///
/// When `points` is non-empty the `[current_ma, pressure_psi]` pairs replace
/// the linear current-to-pressure step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationSection {
    pub raw_at_4ma: i16,
    pub raw_at_20ma: i16,
    pub balance_ma: f64,
    pub full_scale_ma: f64,
    pub full_scale_psi: f64,
    pub points: Vec<[f64; 2]>,
}

impl CalibrationSection {
    pub fn two_point(&self) -> TwoPointCalibration {
        TwoPointCalibration {
            raw_at_4ma: self.raw_at_4ma,
            raw_at_20ma: self.raw_at_20ma,
            balance_ma: self.balance_ma,
            full_scale_ma: self.full_scale_ma,
            full_scale_psi: self.full_scale_psi,
        }
    }

    pub fn converter(&self) -> Result<Converter, SettingsError> {
        if self.points.is_empty() {
            return Ok(Converter::TwoPoint(self.two_point()));
        }

        let mut table = CalibrationTable::new();
        for &[current_ma, pressure_psi] in &self.points {
            table.insert(CalibrationPoint::new(current_ma, pressure_psi))?;
        }
        Ok(Converter::Table(TableCalibration {
            adc: self.two_point(),
            table,
        }))
    }
}

impl Default for CalibrationSection {
    fn default() -> Self {
        let calibration = TwoPointCalibration::default();
        Self {
            raw_at_4ma: calibration.raw_at_4ma,
            raw_at_20ma: calibration.raw_at_20ma,
            balance_ma: calibration.balance_ma,
            full_scale_ma: calibration.full_scale_ma,
            full_scale_psi: calibration.full_scale_psi,
            points: Vec::new(),
        }
    }
}

/// Host paths and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationSection {
    /// Directory receiving the CSV result files.
    pub results_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Operator transcript file, if any.
    pub transcript: Option<PathBuf>,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            transcript: None,
        }
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, SettingsError> {
    Duration::try_from_secs_f64(value).map_err(|_| SettingsError::InvalidDuration { field })
}

#[cfg(test)]
mod tests {
    use leak_core::calibration::RawConverter;
    use leak_core::config::ConfigError;
    use leak_core::pneumatics::TestPhase;

    use super::*;

    #[test]
    fn empty_file_yields_reference_defaults() {
        let settings = Settings::from_toml_str("").expect("empty settings");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.test_config().expect("valid"), TestConfig::default());
        assert_eq!(settings.station.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let settings = Settings::from_toml_str(
            r#"
            [timing]
            fill = 6.5

            [pressure]
            target_fill_psi = 0.75

            [station]
            results_dir = "/tmp/leak"
            "#,
        )
        .expect("parse");

        let config = settings.test_config().expect("valid");
        assert_eq!(config.timing.fill, Duration::from_millis(6_500));
        assert_eq!(config.timing.test, Duration::from_secs(30));
        assert!((config.pressure.target_fill_psi - 0.75).abs() < 1e-12);
        assert_eq!(settings.station.results_dir, PathBuf::from("/tmp/leak"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Settings::from_toml_str("[timing]\nfil = 3.0\n").expect_err("typo");
        assert!(matches!(error, SettingsError::Parse(_)));
    }

    #[test]
    fn negative_durations_are_rejected() {
        let settings = Settings::from_toml_str("[timing]\nextend = -1.0\n").expect("parse");
        assert!(matches!(
            settings.test_config(),
            Err(SettingsError::InvalidDuration {
                field: "timing.extend"
            })
        ));
    }

    #[test]
    fn validation_runs_on_conversion() {
        let settings = Settings::from_toml_str("[timing]\ntest = 90.0\n").expect("parse");
        assert!(matches!(
            settings.test_config(),
            Err(SettingsError::Invalid(ConfigError::PhaseExceedsSafetyTimeout(
                TestPhase::Testing
            )))
        ));
    }

    #[test]
    fn calibration_points_build_a_table() {
        let settings = Settings::from_toml_str(
            r"
            [calibration]
            points = [[20.037, 1.0], [4.025, 0.0], [12.031, 0.5]]
            ",
        )
        .expect("parse");

        let Converter::Table(calibration) = settings.converter().expect("converter") else {
            panic!("expected a table converter");
        };
        assert_eq!(calibration.table.len(), 3);
        let raw = calibration.adc.raw_for_pressure(0.5);
        assert!((calibration.to_psi(raw) - 0.5).abs() < 0.002);
    }

    #[test]
    fn duplicate_calibration_points_are_rejected() {
        let settings = Settings::from_toml_str(
            "[calibration]\npoints = [[4.0, 0.0], [4.0, 0.1]]\n",
        )
        .expect("parse");
        assert!(matches!(
            settings.converter(),
            Err(SettingsError::Calibration(_))
        ));
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let mut settings = Settings::default();
        settings.safety.max_fill_attempts = 5;
        let text = toml::to_string_pretty(&settings).expect("serialize");
        assert_eq!(Settings::from_toml_str(&text).expect("parse"), settings);
    }
}
