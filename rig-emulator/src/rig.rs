//! Simulated pneumatic rig.
//!
//! A single [`Rig`] owns the part pressure and the four output lines. The
//! sensor and actuator gateways handed to the station are thin views onto
//! it, so valve changes made by the control loop show up in the next sensor
//! read taken by the sampling thread.

use std::sync::Arc;

use leak_core::calibration::TwoPointCalibration;
use leak_core::hardware::{
    ADS1115_MAX_RATE_HZ, ActuatorGateway, Gain, HardwareError, RawReading, SensorGateway,
    ads1115_rate_at_least,
};
use leak_core::pneumatics::OutputId;
use leak_core::repl::grammar::FaultKind;
use leak_core::time::Instant;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use station::MonotonicClock;
use tracing::{debug, info};

/// Physical behaviour of the simulated fixture.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RigParams {
    /// Regulated supply pressure the part fills toward.
    pub supply_psi: f64,
    /// Supply pressure while the regulator fault is injected.
    pub failed_regulator_psi: f64,
    /// Fill time constant in seconds.
    pub fill_tau_s: f64,
    /// Exhaust time constant in seconds.
    pub vent_tau_s: f64,
    /// Pressure loss through the part while sealed.
    pub leak_psi_per_s: f64,
    /// Peak amplitude of uniform sensor noise.
    pub noise_psi: f64,
}

impl Default for RigParams {
    fn default() -> Self {
        Self {
            supply_psi: 0.82,
            failed_regulator_psi: 1.1,
            fill_tau_s: 0.6,
            vent_tau_s: 0.25,
            leak_psi_per_s: 0.0,
            noise_psi: 0.000_5,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Faults {
    sensor: bool,
    valve: bool,
    regulator: bool,
}

struct RigState {
    params: RigParams,
    pressure_psi: f64,
    outputs: [bool; 4],
    updated_at: Option<Instant>,
    faults: Faults,
    rng: StdRng,
    rate_hz: u32,
}

impl RigState {
    /// Integrates the pressure model up to `now`.
    fn advance(&mut self, now: Instant) {
        let Some(last) = self.updated_at.replace(now) else {
            return;
        };
        let dt = now.seconds_since(last);
        if dt <= 0.0 {
            return;
        }

        let params = self.params;
        let fill_open = self.outputs[OutputId::Fill.as_index()];
        let exhaust_open = self.outputs[OutputId::Exhaust.as_index()];

        if fill_open {
            let supply = if self.faults.regulator {
                params.failed_regulator_psi
            } else {
                params.supply_psi
            };
            self.pressure_psi += (supply - self.pressure_psi) * approach(dt, params.fill_tau_s);
        } else if exhaust_open {
            self.pressure_psi -= self.pressure_psi * approach(dt, params.vent_tau_s);
        } else {
            self.pressure_psi = (self.pressure_psi - params.leak_psi_per_s * dt).max(0.0);
        }
    }

    fn noisy_pressure(&mut self) -> f64 {
        let noise = self.params.noise_psi;
        if noise > 0.0 {
            self.pressure_psi + self.rng.random_range(-noise..=noise)
        } else {
            self.pressure_psi
        }
    }
}

/// Fraction of the remaining gap closed after `dt` seconds of a first-order lag.
fn approach(dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        1.0
    } else {
        1.0 - (-dt / tau).exp()
    }
}

/// Shared handle to the simulated fixture.
#[derive(Clone)]
pub struct Rig {
    state: Arc<Mutex<RigState>>,
    clock: MonotonicClock,
    calibration: TwoPointCalibration,
}

impl Rig {
    pub fn new(
        params: RigParams,
        calibration: TwoPointCalibration,
        clock: MonotonicClock,
        seed: u64,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                params,
                pressure_psi: 0.0,
                outputs: [false; 4],
                updated_at: None,
                faults: Faults::default(),
                rng: StdRng::seed_from_u64(seed),
                rate_hz: ADS1115_MAX_RATE_HZ,
            })),
            clock,
            calibration,
        }
    }

    pub fn sensor(&self) -> SimSensor {
        SimSensor { rig: self.clone() }
    }

    pub fn actuators(&self) -> SimActuators {
        SimActuators { rig: self.clone() }
    }

    /// Applies an operator fault command.
    pub fn inject(&self, kind: FaultKind) {
        let mut state = self.state.lock();
        match kind {
            FaultKind::Sensor => state.faults.sensor = true,
            FaultKind::Valve => state.faults.valve = true,
            FaultKind::Overshoot => state.faults.regulator = true,
            FaultKind::Clear => state.faults = Faults::default(),
        }
        info!(fault = kind.label(), "rig fault updated");
    }

    fn read(&self) -> Result<RawReading, HardwareError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.faults.sensor {
            return Err(HardwareError::Timeout);
        }
        state.advance(now);
        let psi = state.noisy_pressure();
        Ok(RawReading::new(self.calibration.raw_for_pressure(psi), now))
    }

    fn drive(&self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.faults.valve {
            return Err(HardwareError::Bus);
        }
        state.advance(now);
        state.outputs[output.as_index()] = on;
        Ok(())
    }
}

#[cfg(test)]
impl Rig {
    /// Noise-free pressure at the current instant.
    pub fn pressure_psi(&self) -> f64 {
        let mut state = self.state.lock();
        state.advance(self.clock.now());
        state.pressure_psi
    }

    pub fn set_pressure(&self, psi: f64) {
        let mut state = self.state.lock();
        state.advance(self.clock.now());
        state.pressure_psi = psi.max(0.0);
    }

    pub fn output(&self, output: OutputId) -> bool {
        self.state.lock().outputs[output.as_index()]
    }

    /// Conversion rate last programmed into the simulated ADC.
    pub fn rate_hz(&self) -> u32 {
        self.state.lock().rate_hz
    }
}

/// ADC view of the rig.
pub struct SimSensor {
    rig: Rig,
}

impl SensorGateway for SimSensor {
    fn configure(&mut self, rate_hz: u32, gain: Gain) -> Result<(), HardwareError> {
        let programmed = ads1115_rate_at_least(rate_hz).ok_or(HardwareError::Unsupported)?;
        debug!(requested = rate_hz, programmed, ?gain, "simulated ADC configured");
        self.rig.state.lock().rate_hz = programmed;
        Ok(())
    }

    fn read_raw(&mut self) -> Result<RawReading, HardwareError> {
        self.rig.read()
    }
}

/// Relay board view of the rig.
pub struct SimActuators {
    rig: Rig,
}

impl ActuatorGateway for SimActuators {
    fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        self.rig.drive(output, on)
    }
}
