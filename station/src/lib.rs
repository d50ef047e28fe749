//! Host runtime for the pneumatic leak tester.
//!
//! `leak-core` owns the sequencing, acquisition bookkeeping and evaluation;
//! this crate supplies the parts that need an operating system: the sampling
//! thread, the control loop thread, TOML settings, `tracing` output and CSV
//! result files.

pub mod cancel;
pub mod clock;
pub mod controller;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod settings;
pub mod sinks;

pub use cancel::CancelToken;
pub use clock::MonotonicClock;
pub use controller::{ControlMessage, StationController, StationHandle, StationStatus};
pub use error::{SettingsError, StationError};
pub use pipeline::AcquisitionPipeline;
pub use settings::Settings;
