use std::io;
use std::path::PathBuf;

use leak_core::acquisition::AcquisitionError;
use leak_core::calibration::CalibrationError;
use leak_core::config::ConfigError;
use leak_core::sequencer::StartRejection;
use thiserror::Error;

/// Failures of the host runtime.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Rejected(StartRejection),

    #[error("acquisition failed: {0}")]
    Acquisition(AcquisitionError),

    #[error("control loop is no longer running")]
    ControlLoopGone,
}

impl From<StartRejection> for StationError {
    fn from(rejection: StartRejection) -> Self {
        StationError::Rejected(rejection)
    }
}

impl From<AcquisitionError> for StationError {
    fn from(error: AcquisitionError) -> Self {
        StationError::Acquisition(error)
    }
}

/// Problems loading or applying a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be a finite, non-negative number of seconds")]
    InvalidDuration { field: &'static str },

    #[error("invalid test configuration: {0}")]
    Invalid(ConfigError),

    #[error("invalid calibration: {0}")]
    Calibration(CalibrationError),
}

impl From<ConfigError> for SettingsError {
    fn from(error: ConfigError) -> Self {
        SettingsError::Invalid(error)
    }
}

impl From<CalibrationError> for SettingsError {
    fn from(error: CalibrationError) -> Self {
        SettingsError::Calibration(error)
    }
}

pub type Result<T, E = StationError> = std::result::Result<T, E>;
