//! Command dispatcher for operator front-ends.
//!
//! Parsed commands are turned into calls on an [`OperatorControl`]
//! implementation. Front-ends render the resulting [`CommandOutcome`]; help is
//! left to them since it only needs the catalog.

use alloc::vec::Vec;
use core::fmt;

use crate::acquisition::{AcquisitionMode, Sample};
use crate::config::TestConfig;
use crate::status::SequencerSnapshot;
use crate::telemetry::RunId;

use super::grammar::{self, Command, FaultKind, SampleRequest};

/// Largest burst an operator may request in one command.
pub const MAX_BURST_SAMPLES: u32 = 4_096;

/// Operator control surface of a leak-test station.
pub trait OperatorControl {
    type Error: fmt::Display;

    fn start_test(&mut self) -> Result<RunId, Self::Error>;

    /// Returns `false` when there was no run to abort.
    fn abort_test(&mut self) -> Result<bool, Self::Error>;

    fn reset(&mut self) -> Result<(), Self::Error>;

    fn status(&mut self) -> SequencerSnapshot;

    fn config(&mut self) -> TestConfig;

    fn sample(&mut self, mode: AcquisitionMode) -> Result<Vec<Sample>, Self::Error>;

    /// Injects a simulated fault. Returns `false` on real hardware.
    fn inject_fault(&mut self, _kind: FaultKind) -> bool {
        false
    }
}

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<'a> {
    Started(RunId),
    AbortRequested,
    NothingToAbort,
    Reset,
    Status(SequencerSnapshot),
    Config(TestConfig),
    Samples {
        mode: AcquisitionMode,
        samples: Vec<Sample>,
    },
    FaultInjected(FaultKind),
    Help(Option<&'a str>),
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Unsupported(&'static str),
    Station(E),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E: fmt::Display> fmt::Display for CommandError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => write!(f, "syntax: {error}"),
            CommandError::Unsupported(what) => write!(f, "unsupported: {what}"),
            CommandError::Station(error) => write!(f, "{error}"),
        }
    }
}

/// Parses operator lines and applies them to a station.
pub struct CommandExecutor<C> {
    control: C,
}

impl<C> CommandExecutor<C> {
    pub const fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn into_inner(self) -> C {
        self.control
    }
}

impl<C: OperatorControl> CommandExecutor<C> {
    /// Parses and executes one command line.
    pub fn execute<'a>(
        &mut self,
        line: &'a str,
    ) -> Result<CommandOutcome<'a>, CommandError<'a, C::Error>> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    pub fn dispatch<'a>(
        &mut self,
        command: Command<'a>,
    ) -> Result<CommandOutcome<'a>, CommandError<'a, C::Error>> {
        match command {
            Command::Start => self
                .control
                .start_test()
                .map(CommandOutcome::Started)
                .map_err(CommandError::Station),
            Command::Abort => match self.control.abort_test() {
                Ok(true) => Ok(CommandOutcome::AbortRequested),
                Ok(false) => Ok(CommandOutcome::NothingToAbort),
                Err(error) => Err(CommandError::Station(error)),
            },
            Command::Reset => self
                .control
                .reset()
                .map(|()| CommandOutcome::Reset)
                .map_err(CommandError::Station),
            Command::Status => Ok(CommandOutcome::Status(self.control.status())),
            Command::Config => Ok(CommandOutcome::Config(self.control.config())),
            Command::Sample(request) => {
                let mode = self.sample_mode(request)?;
                self.control
                    .sample(mode)
                    .map(|samples| CommandOutcome::Samples { mode, samples })
                    .map_err(CommandError::Station)
            }
            Command::Fault(kind) => {
                if self.control.inject_fault(kind) {
                    Ok(CommandOutcome::FaultInjected(kind))
                } else {
                    Err(CommandError::Unsupported("fault injection needs a simulated rig"))
                }
            }
            Command::Help(topic) => Ok(CommandOutcome::Help(topic)),
        }
    }

    fn sample_mode<'a>(
        &mut self,
        request: SampleRequest,
    ) -> Result<AcquisitionMode, CommandError<'a, C::Error>> {
        match request {
            SampleRequest::Single => Ok(AcquisitionMode::FastSingle),
            SampleRequest::Burst { count, rate_hz } => {
                if count == 0 || count > MAX_BURST_SAMPLES {
                    return Err(CommandError::Unsupported("burst count must be 1-4096"));
                }
                let rate_hz = match rate_hz {
                    Some(rate) => rate,
                    None => self.control.config().acquisition.burst_rate_hz,
                };
                Ok(AcquisitionMode::Burst { count, rate_hz })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::time::Instant;

    #[derive(Default)]
    struct FakeStation {
        running: bool,
        starts: u32,
        last_mode: Option<AcquisitionMode>,
    }

    impl OperatorControl for FakeStation {
        type Error = &'static str;

        fn start_test(&mut self) -> Result<RunId, Self::Error> {
            if self.running {
                return Err("busy");
            }
            self.running = true;
            self.starts += 1;
            Ok(self.starts)
        }

        fn abort_test(&mut self) -> Result<bool, Self::Error> {
            Ok(core::mem::take(&mut self.running))
        }

        fn reset(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn status(&mut self) -> SequencerSnapshot {
            SequencerSnapshot::idle()
        }

        fn config(&mut self) -> TestConfig {
            TestConfig::default()
        }

        fn sample(&mut self, mode: AcquisitionMode) -> Result<Vec<Sample>, Self::Error> {
            self.last_mode = Some(mode);
            Ok(vec![Sample::new(0.42, Instant::ZERO, 0)])
        }
    }

    #[test]
    fn start_then_busy() {
        let mut executor = CommandExecutor::new(FakeStation::default());
        assert_eq!(executor.execute("start"), Ok(CommandOutcome::Started(1)));
        assert_eq!(
            executor.execute("start"),
            Err(CommandError::Station("busy"))
        );
        assert_eq!(executor.execute("abort"), Ok(CommandOutcome::AbortRequested));
        assert_eq!(executor.execute("abort"), Ok(CommandOutcome::NothingToAbort));
    }

    #[test]
    fn burst_defaults_to_configured_rate() {
        let mut executor = CommandExecutor::new(FakeStation::default());
        let outcome = executor.execute("sample burst 10").expect("burst");
        assert!(matches!(outcome, CommandOutcome::Samples { .. }));
        assert_eq!(
            executor.control().last_mode,
            Some(AcquisitionMode::Burst {
                count: 10,
                rate_hz: 250
            })
        );
    }

    #[test]
    fn rejects_zero_burst() {
        let mut executor = CommandExecutor::new(FakeStation::default());
        assert!(matches!(
            executor.execute("sample burst 0"),
            Err(CommandError::Unsupported(_))
        ));
    }

    #[test]
    fn fault_injection_is_unsupported_by_default() {
        let mut executor = CommandExecutor::new(FakeStation::default());
        assert!(matches!(
            executor.execute("fault sensor"),
            Err(CommandError::Unsupported(_))
        ));
    }

    #[test]
    fn syntax_errors_surface_as_parse() {
        let mut executor = CommandExecutor::new(FakeStation::default());
        assert!(matches!(
            executor.execute("launch"),
            Err(CommandError::Parse(grammar::ParseError::UnknownCommand("launch")))
        ));
    }
}
