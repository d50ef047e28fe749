#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use leak_core::calibration::TwoPointCalibration;
use leak_core::config::TestConfig;
use leak_core::hardware::{ActuatorGateway, Gain, HardwareError, RawReading, SensorGateway};
use leak_core::pneumatics::OutputId;
use parking_lot::Mutex;
use station::MonotonicClock;

/// Pressure the bench settles at while the fill valve is open.
pub const FILLED_PSI: f64 = 0.82;

#[derive(Debug, Default)]
pub struct BenchState {
    pub pressure_psi: f64,
    pub outputs: [bool; 4],
    pub sensor_fault: Option<HardwareError>,
    pub reads: u64,
    pub configured_rate: Option<u32>,
}

/// Step-response pneumatic bench shared by the sensor and valve doubles.
///
/// Opening the fill valve jumps straight to [`FILLED_PSI`]; opening the
/// exhaust vents to zero.
#[derive(Clone, Debug, Default)]
pub struct Bench(pub Arc<Mutex<BenchState>>);

impl Bench {
    pub fn set_pressure(&self, psi: f64) {
        self.0.lock().pressure_psi = psi;
    }

    pub fn fail_sensor(&self, error: HardwareError) {
        self.0.lock().sensor_fault = Some(error);
    }

    pub fn clear_sensor_fault(&self) {
        self.0.lock().sensor_fault = None;
    }

    pub fn outputs(&self) -> [bool; 4] {
        self.0.lock().outputs
    }

    pub fn reads(&self) -> u64 {
        self.0.lock().reads
    }

    pub fn sensor(&self, clock: MonotonicClock) -> BenchSensor {
        BenchSensor {
            bench: self.clone(),
            clock,
            calibration: TwoPointCalibration::default(),
        }
    }

    pub fn valves(&self) -> BenchValves {
        BenchValves(self.clone())
    }
}

pub struct BenchSensor {
    bench: Bench,
    clock: MonotonicClock,
    calibration: TwoPointCalibration,
}

impl SensorGateway for BenchSensor {
    fn configure(&mut self, rate_hz: u32, _gain: Gain) -> Result<(), HardwareError> {
        self.bench.0.lock().configured_rate = Some(rate_hz);
        Ok(())
    }

    fn read_raw(&mut self) -> Result<RawReading, HardwareError> {
        let mut state = self.bench.0.lock();
        if let Some(error) = state.sensor_fault {
            return Err(error);
        }
        state.reads += 1;
        let raw = self.calibration.raw_for_pressure(state.pressure_psi);
        Ok(RawReading::new(raw, self.clock.now()))
    }
}

pub struct BenchValves(Bench);

impl ActuatorGateway for BenchValves {
    fn set(&mut self, output: OutputId, on: bool) -> Result<(), HardwareError> {
        let mut state = self.0.0.lock();
        state.outputs[output.as_index()] = on;
        if on {
            match output {
                OutputId::Fill => state.pressure_psi = FILLED_PSI,
                OutputId::Exhaust => state.pressure_psi = 0.0,
                OutputId::Extend | OutputId::Retract => {}
            }
        }
        Ok(())
    }
}

/// Configuration that runs a whole test in well under two seconds.
pub fn quick_config() -> TestConfig {
    let mut config = TestConfig::default();
    config.timing.extend = Duration::from_millis(40);
    config.timing.fill = Duration::from_millis(80);
    config.timing.stabilize = Duration::from_millis(80);
    config.timing.test = Duration::from_millis(500);
    config.timing.exhaust = Duration::from_millis(40);
    config.timing.retract = Duration::from_millis(40);
    config.safety.poll_interval = Duration::from_millis(10);
    config.safety.safety_timeout = Duration::from_secs(5);
    config.acquisition.target_rate_hz = 200;
    config.acquisition.buffer_capacity = 1_024;
    config.acquisition.min_window_fraction = 0.5;
    config
}
