//! Pneumatic outputs, their interlocks, and the per-phase drive plan.
//!
//! The station drives four solenoids through a relay board: the DUT fill and
//! exhaust valves and the fixture cylinder's extend and retract coils. Each
//! pair is mutually exclusive. [`ActuatorBank`] enforces that before any write
//! reaches the gateway by releasing the partner output first
//! (break-before-make).

use crate::hardware::{ActuatorGateway, HardwareError};

pub mod phases;

pub use phases::{LEAK_TEST_PLAN, PhaseCompletion, PhaseStep, TestPhase, step_for};

/// Logical solenoid outputs exposed by the fixture.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutputId {
    Fill,
    Exhaust,
    Extend,
    Retract,
}

impl OutputId {
    /// Deterministic index for lookups into [`ALL_OUTPUTS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            OutputId::Fill => 0,
            OutputId::Exhaust => 1,
            OutputId::Extend => 2,
            OutputId::Retract => 3,
        }
    }

    /// Attempts to construct an [`OutputId`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(OutputId::Fill),
            1 => Some(OutputId::Exhaust),
            2 => Some(OutputId::Extend),
            3 => Some(OutputId::Retract),
            _ => None,
        }
    }

    /// Output that must never be energized together with `self`.
    #[must_use]
    pub const fn interlock_partner(self) -> Self {
        match self {
            OutputId::Fill => OutputId::Exhaust,
            OutputId::Exhaust => OutputId::Fill,
            OutputId::Extend => OutputId::Retract,
            OutputId::Retract => OutputId::Extend,
        }
    }

    /// Short lowercase label used by logs and the REPL.
    #[must_use]
    pub const fn label(self) -> &'static str {
        output_by_id(self).name
    }
}

impl core::fmt::Display for OutputId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Relay polarity as wired on the driver board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayPolarity {
    ActiveLow,
    ActiveHigh,
}

/// Metadata describing how an output is routed on the station.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputLine {
    pub id: OutputId,
    pub name: &'static str,
    pub gpio: u8,
    pub relay_channel: u8,
    pub polarity: RelayPolarity,
}

impl OutputLine {
    pub const fn new(
        id: OutputId,
        name: &'static str,
        gpio: u8,
        relay_channel: u8,
        polarity: RelayPolarity,
    ) -> Self {
        Self {
            id,
            name,
            gpio,
            relay_channel,
            polarity,
        }
    }
}

/// Compile-time catalog of every solenoid output (BCM numbering).
pub const ALL_OUTPUTS: [OutputLine; 4] = [
    OutputLine::new(OutputId::Fill, "fill", 24, 1, RelayPolarity::ActiveLow),
    OutputLine::new(OutputId::Exhaust, "exhaust", 23, 2, RelayPolarity::ActiveLow),
    OutputLine::new(OutputId::Extend, "extend", 9, 3, RelayPolarity::ActiveLow),
    OutputLine::new(OutputId::Retract, "retract", 10, 4, RelayPolarity::ActiveLow),
];

/// Retrieve output metadata by identifier.
#[must_use]
pub const fn output_by_id(id: OutputId) -> OutputLine {
    ALL_OUTPUTS[id.as_index()]
}

/// Logical on/off level of every output.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ActuatorState {
    energized: [bool; 4],
}

impl ActuatorState {
    /// Every output released.
    pub const ALL_OFF: Self = Self {
        energized: [false; 4],
    };

    /// Returns a copy with `output` set to `on`. No interlock check is applied.
    #[must_use]
    pub const fn with(mut self, output: OutputId, on: bool) -> Self {
        self.energized[output.as_index()] = on;
        self
    }

    /// Pattern with exactly one output energized.
    #[must_use]
    pub const fn only(output: OutputId) -> Self {
        Self::ALL_OFF.with(output, true)
    }

    #[must_use]
    pub const fn is_on(&self, output: OutputId) -> bool {
        self.energized[output.as_index()]
    }

    #[must_use]
    pub const fn all_off(&self) -> bool {
        !self.energized[0] && !self.energized[1] && !self.energized[2] && !self.energized[3]
    }

    /// Returns `true` when neither mutually exclusive pair is energized together.
    #[must_use]
    pub const fn respects_interlocks(&self) -> bool {
        !(self.is_on(OutputId::Fill) && self.is_on(OutputId::Exhaust))
            && !(self.is_on(OutputId::Extend) && self.is_on(OutputId::Retract))
    }

    /// Iterates over the energized outputs.
    pub fn energized(&self) -> impl Iterator<Item = OutputId> + '_ {
        ALL_OUTPUTS
            .iter()
            .map(|line| line.id)
            .filter(|id| self.is_on(*id))
    }
}

/// Interlocked front for an [`ActuatorGateway`].
///
/// Tracks the last successfully written level of every output and whether the
/// bank can vouch that everything is released. A failed write leaves the bank
/// unverified until [`ActuatorBank::force_all_off`] succeeds.
pub struct ActuatorBank<A> {
    gateway: A,
    state: ActuatorState,
    verified: bool,
}

impl<A: ActuatorGateway> ActuatorBank<A> {
    /// Wraps a gateway. Nothing is written until the first command.
    pub const fn new(gateway: A) -> Self {
        Self {
            gateway,
            state: ActuatorState::ALL_OFF,
            verified: false,
        }
    }

    /// Logical output levels as last written.
    pub const fn state(&self) -> ActuatorState {
        self.state
    }

    /// Returns `true` when every output is known to be released.
    pub const fn confirmed_off(&self) -> bool {
        self.verified && self.state.all_off()
    }

    pub fn gateway(&self) -> &A {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut A {
        &mut self.gateway
    }

    /// Drives one output, releasing its interlock partner first when energizing.
    pub fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        if on {
            let partner = output.interlock_partner();
            if self.state.is_on(partner) {
                self.write(partner, false)?;
            }
        }

        self.write(output, on)
    }

    /// Moves the bank to `target`, releasing outputs before energizing any.
    pub fn apply(&mut self, target: ActuatorState) -> Result<(), HardwareError> {
        for line in &ALL_OUTPUTS {
            if self.state.is_on(line.id) && !target.is_on(line.id) {
                self.write(line.id, false)?;
            }
        }

        for line in &ALL_OUTPUTS {
            if target.is_on(line.id) && !self.state.is_on(line.id) {
                self.set(line.id, true)?;
            }
        }

        Ok(())
    }

    /// Releases every output unconditionally.
    ///
    /// All four writes are attempted even when one fails; the first failure is
    /// returned and the bank stays unverified.
    pub fn force_all_off(&mut self) -> Result<(), HardwareError> {
        let mut first_error = None;
        for line in &ALL_OUTPUTS {
            match self.gateway.set(line.id, false) {
                Ok(()) => self.state = self.state.with(line.id, false),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        self.verified = first_error.is_none();
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn write(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        match self.gateway.set(output, on) {
            Ok(()) => {
                self.state = self.state.with(output, on);
                Ok(())
            }
            Err(error) => {
                self.verified = false;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[derive(Default)]
    struct RecordingGateway {
        writes: Vec<(OutputId, bool)>,
        fail_on: Option<OutputId>,
    }

    impl ActuatorGateway for RecordingGateway {
        fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
            if self.fail_on == Some(output) {
                return Err(HardwareError::Bus);
            }
            self.writes.push((output, on));
            Ok(())
        }
    }

    #[test]
    fn catalog_indices_round_trip() {
        for (index, line) in ALL_OUTPUTS.iter().enumerate() {
            assert_eq!(line.id.as_index(), index);
            assert_eq!(OutputId::from_index(index), Some(line.id));
            assert_eq!(line.polarity, RelayPolarity::ActiveLow);
        }
        assert_eq!(OutputId::from_index(4), None);
        assert_eq!(output_by_id(OutputId::Fill).gpio, 24);
        assert_eq!(output_by_id(OutputId::Retract).gpio, 10);
    }

    #[test]
    fn energizing_releases_partner_first() {
        let mut bank = ActuatorBank::new(RecordingGateway::default());
        bank.set(OutputId::Fill, true).expect("fill on");
        bank.set(OutputId::Exhaust, true).expect("exhaust on");

        assert_eq!(
            bank.gateway().writes,
            [
                (OutputId::Fill, true),
                (OutputId::Fill, false),
                (OutputId::Exhaust, true),
            ]
        );
        assert!(bank.state().respects_interlocks());
        assert!(bank.state().is_on(OutputId::Exhaust));
        assert!(!bank.state().is_on(OutputId::Fill));
    }

    #[test]
    fn apply_breaks_before_make() {
        let mut bank = ActuatorBank::new(RecordingGateway::default());
        bank.apply(ActuatorState::only(OutputId::Extend))
            .expect("extend pattern");
        bank.apply(ActuatorState::only(OutputId::Retract))
            .expect("retract pattern");

        assert_eq!(
            bank.gateway().writes,
            [
                (OutputId::Extend, true),
                (OutputId::Extend, false),
                (OutputId::Retract, true),
            ]
        );
    }

    #[test]
    fn failed_write_clears_verification() {
        let mut bank = ActuatorBank::new(RecordingGateway::default());
        bank.force_all_off().expect("initial release");
        assert!(bank.confirmed_off());

        bank.gateway_mut().fail_on = Some(OutputId::Fill);
        assert_eq!(bank.set(OutputId::Fill, true), Err(HardwareError::Bus));
        assert!(!bank.confirmed_off());

        // Remaining outputs are still released when one write fails.
        bank.gateway_mut().writes.clear();
        assert_eq!(bank.force_all_off(), Err(HardwareError::Bus));
        assert_eq!(bank.gateway().writes.len(), 3);
        assert!(!bank.confirmed_off());

        bank.gateway_mut().fail_on = None;
        bank.force_all_off().expect("release after recovery");
        assert!(bank.confirmed_off());
    }

    #[test]
    fn energized_lists_active_outputs() {
        let state = ActuatorState::ALL_OFF
            .with(OutputId::Fill, true)
            .with(OutputId::Extend, true);
        let active: Vec<OutputId> = state.energized().collect();
        assert_eq!(active, [OutputId::Fill, OutputId::Extend]);
        assert!(state.respects_interlocks());
        assert!(!state.with(OutputId::Retract, true).respects_interlocks());
    }
}
