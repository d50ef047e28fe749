//! Capabilities the core needs from the valve drivers and the analog front end.
//!
//! The sequencer and acquisition logic only ever talk to hardware through these
//! traits. Concrete GPIO/I2C bindings, simulated rigs, and test doubles all live
//! outside this crate.

use core::fmt;

use crate::pneumatics::OutputId;
use crate::time::Instant;

/// Highest conversion rate supported by the ADS1115 reference ADC.
pub const ADS1115_MAX_RATE_HZ: u32 = 860;

/// Conversion rates the ADS1115 can be programmed for, ascending.
pub const ADS1115_DATA_RATES: [u32; 8] = [8, 16, 32, 64, 128, 250, 475, 860];

/// Communication failure reported by a gateway.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HardwareError {
    /// Bus transaction failed (NACK, arbitration loss, short read).
    Bus,
    /// Device did not answer within its conversion budget.
    Timeout,
    /// Device or driver is not available.
    Disconnected,
    /// Driver rejected the requested configuration.
    Unsupported,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareError::Bus => f.write_str("bus error"),
            HardwareError::Timeout => f.write_str("device timeout"),
            HardwareError::Disconnected => f.write_str("device disconnected"),
            HardwareError::Unsupported => f.write_str("unsupported configuration"),
        }
    }
}

/// Programmable gain of the analog front end.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Gain {
    TwoThirds,
    One,
    /// ±2.048 V, the range used with the 4-20 mA shunt.
    #[default]
    Two,
    Four,
    Eight,
    Sixteen,
}

impl Gain {
    /// Full-scale input range in millivolts.
    #[must_use]
    pub const fn full_scale_mv(self) -> u16 {
        match self {
            Gain::TwoThirds => 6_144,
            Gain::One => 4_096,
            Gain::Two => 2_048,
            Gain::Four => 1_024,
            Gain::Eight => 512,
            Gain::Sixteen => 256,
        }
    }
}

/// Smallest ADS1115 data rate that keeps up with `rate_hz`, if any.
#[must_use]
pub fn ads1115_rate_at_least(rate_hz: u32) -> Option<u32> {
    ADS1115_DATA_RATES
        .iter()
        .copied()
        .find(|&supported| supported >= rate_hz)
}

/// Single raw conversion stamped by the gateway.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawReading {
    pub raw: i16,
    pub timestamp: Instant,
}

impl RawReading {
    #[must_use]
    pub const fn new(raw: i16, timestamp: Instant) -> Self {
        Self { raw, timestamp }
    }
}

/// Valve driver capability.
///
/// Writes take effect synchronously; the interlock logic relies on the output
/// having changed by the time `set` returns.
pub trait ActuatorGateway {
    /// Drives `output` on or off.
    fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError>;
}

/// Pressure transducer front end.
pub trait SensorGateway {
    /// Programs the converter for at least `rate_hz` conversions per second.
    fn configure(&mut self, rate_hz: u32, gain: Gain) -> Result<(), HardwareError>;

    /// Performs one blocking conversion.
    fn read_raw(&mut self) -> Result<RawReading, HardwareError>;

    /// Hardware ceiling on conversions per second.
    fn max_rate_hz(&self) -> u32 {
        ADS1115_MAX_RATE_HZ
    }
}

impl<T: ActuatorGateway + ?Sized> ActuatorGateway for &mut T {
    fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        (**self).set(output, on)
    }
}

/// Actuator gateway that accepts every write without touching hardware.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopActuators;

impl ActuatorGateway for NoopActuators {
    fn set(&mut self, _: OutputId, _: bool) -> Result<(), HardwareError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_next_supported_data_rate() {
        assert_eq!(ads1115_rate_at_least(1), Some(8));
        assert_eq!(ads1115_rate_at_least(128), Some(128));
        assert_eq!(ads1115_rate_at_least(200), Some(250));
        assert_eq!(ads1115_rate_at_least(860), Some(860));
        assert_eq!(ads1115_rate_at_least(861), None);
    }

    #[test]
    fn default_gain_matches_current_loop_shunt() {
        assert_eq!(Gain::default(), Gain::Two);
        assert_eq!(Gain::default().full_scale_mv(), 2_048);
    }
}
