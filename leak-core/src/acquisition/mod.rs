//! Pressure acquisition: sample containers, pacing, and the pipeline contract.
//!
//! The pipeline itself lives with the runtime that owns a thread and a clock.
//! This module holds the pieces that runtime is built from and the
//! [`Acquisition`] trait the sequencer drives it through.

pub mod rate;
pub mod session;
pub mod window;

use core::fmt;

use crate::hardware::{ADS1115_MAX_RATE_HZ, HardwareError};

pub use rate::{MAX_RATE_WINDOW, Pacer, RateMeter, interval_for};
pub use session::StreamSession;
pub use window::{Sample, SampleRing, SampleWindow};

/// Parameters of a streaming session.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub target_rate_hz: u32,
    pub buffer_capacity: usize,
    /// Pressure above which the first streamed sample is latched as an overshoot.
    pub trip_above_psi: Option<f64>,
}

impl StreamRequest {
    #[must_use]
    pub const fn new(target_rate_hz: u32, buffer_capacity: usize) -> Self {
        Self {
            target_rate_hz,
            buffer_capacity,
            trip_above_psi: None,
        }
    }

    #[must_use]
    pub const fn with_trip(mut self, limit_psi: f64) -> Self {
        self.trip_above_psi = Some(limit_psi);
        self
    }

    /// Rejects zero capacity and rates outside `1..=max_rate_hz`.
    pub fn validate(&self, max_rate_hz: u32) -> Result<(), AcquisitionError> {
        validate_rate(self.target_rate_hz, max_rate_hz)?;
        if self.buffer_capacity == 0 {
            return Err(AcquisitionError::InvalidCapacity);
        }
        Ok(())
    }
}

/// Rejects rates outside `1..=max_rate_hz`.
pub fn validate_rate(rate_hz: u32, max_rate_hz: u32) -> Result<(), AcquisitionError> {
    if rate_hz == 0 || rate_hz > max_rate_hz {
        return Err(AcquisitionError::InvalidRate {
            requested: rate_hz,
            max: max_rate_hz,
        });
    }
    Ok(())
}

/// How a caller wants pressure read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionMode {
    /// One read with minimal latency.
    FastSingle,
    /// A fixed number of paced reads, returned together.
    Burst { count: u32, rate_hz: u32 },
    /// Continuous buffered sampling until stopped.
    Streaming { rate_hz: u32, capacity: usize },
}

impl AcquisitionMode {
    /// Burst with the ADS1115 ceiling as its rate.
    #[must_use]
    pub const fn max_rate_burst(count: u32) -> Self {
        AcquisitionMode::Burst {
            count,
            rate_hz: ADS1115_MAX_RATE_HZ,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            AcquisitionMode::FastSingle => "fast-single",
            AcquisitionMode::Burst { .. } => "burst",
            AcquisitionMode::Streaming { .. } => "streaming",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquisitionError {
    /// A streaming session is already active.
    AlreadyRunning,
    InvalidRate { requested: u32, max: u32 },
    /// Capacity or burst count of zero, or above the configured buffer.
    InvalidCapacity,
    /// The capture was cut short by a shutdown.
    Cancelled,
    Hardware(HardwareError),
}

impl From<HardwareError> for AcquisitionError {
    fn from(error: HardwareError) -> Self {
        AcquisitionError::Hardware(error)
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::AlreadyRunning => f.write_str("acquisition already running"),
            AcquisitionError::InvalidRate { requested, max } => {
                write!(f, "invalid rate {requested} SPS (max {max})")
            }
            AcquisitionError::InvalidCapacity => {
                f.write_str("capture size must be between 1 and the buffer capacity")
            }
            AcquisitionError::Cancelled => f.write_str("capture cancelled"),
            AcquisitionError::Hardware(error) => write!(f, "sensor failure: {error}"),
        }
    }
}

/// Contract between the sequencer and a pressure acquisition pipeline.
pub trait Acquisition {
    /// Begins a streaming session.
    fn start(&mut self, request: StreamRequest) -> Result<(), AcquisitionError>;

    /// Ends the session and returns its samples sealed.
    ///
    /// Stopping an idle pipeline returns an empty window.
    fn stop(&mut self) -> SampleWindow;

    /// Single read outside the streaming loop. Does not disturb a session.
    fn read_fast(&mut self) -> Result<Sample, HardwareError>;

    /// Rolling achieved rate of the current or most recent session.
    fn achieved_rate(&self) -> f64;

    fn is_streaming(&self) -> bool;

    /// Newest streamed sample, if any.
    fn latest(&self) -> Option<Sample>;

    /// Removes the first read failure the streaming loop has not yet reported.
    fn take_fault(&mut self) -> Option<HardwareError>;

    /// First streamed sample above the session's trip limit.
    fn overshoot(&self) -> Option<Sample>;

    /// Highest rate the underlying sensor supports.
    fn max_rate_hz(&self) -> u32 {
        ADS1115_MAX_RATE_HZ
    }
}
