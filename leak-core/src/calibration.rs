//! Raw-count to pressure conversion.
//!
//! The transducer reports 4-20 mA across a shunt read by the ADC. Conversion
//! runs in two linear steps: counts to loop current, then loop current to psi
//! using the balance (zero-pressure) and full-scale currents measured for the
//! installed transducer. [`CalibrationTable`] replaces the second step with a
//! piecewise-linear curve when a multipoint calibration is available.

use core::fmt;

use heapless::Vec;

/// Maximum number of points held by a [`CalibrationTable`].
pub const MAX_CALIBRATION_POINTS: usize = 16;

/// Nominal loop current at zero scale, milliamps.
pub const LOOP_MIN_MA: f64 = 4.0;
/// Nominal loop current at full scale, milliamps.
pub const LOOP_MAX_MA: f64 = 20.0;

/// Converts raw ADC counts into pressure.
pub trait RawConverter {
    /// Pressure in psi for a raw conversion result.
    fn to_psi(&self, raw: i16) -> f64;
}

/// Linear two-point calibration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TwoPointCalibration {
    /// ADC counts observed at 4 mA.
    pub raw_at_4ma: i16,
    /// ADC counts observed at 20 mA.
    pub raw_at_20ma: i16,
    /// Loop current with the DUT vented.
    pub balance_ma: f64,
    /// Loop current at the transducer's full-scale pressure.
    pub full_scale_ma: f64,
    /// Pressure represented by `full_scale_ma`.
    pub full_scale_psi: f64,
}

impl TwoPointCalibration {
    /// Loop current for a raw conversion.
    #[must_use]
    pub fn current_ma(&self, raw: i16) -> f64 {
        let span = f64::from(self.raw_at_20ma) - f64::from(self.raw_at_4ma);
        if span == 0.0 {
            return LOOP_MIN_MA;
        }
        LOOP_MIN_MA + (f64::from(raw) - f64::from(self.raw_at_4ma)) * (LOOP_MAX_MA - LOOP_MIN_MA) / span
    }

    /// Pressure for a loop current, clamped at zero.
    #[must_use]
    pub fn pressure_for_current(&self, current_ma: f64) -> f64 {
        let span = self.full_scale_ma - self.balance_ma;
        if span <= 0.0 {
            return 0.0;
        }
        let psi = (current_ma - self.balance_ma) * self.full_scale_psi / span;
        psi.max(0.0)
    }

    /// Raw counts that would produce `psi`, rounded and clamped to the ADC range.
    ///
    /// Simulated front ends use this to synthesize conversions.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn raw_for_pressure(&self, psi: f64) -> i16 {
        let current = self.balance_ma + psi * (self.full_scale_ma - self.balance_ma) / self.full_scale_psi;
        let span = f64::from(self.raw_at_20ma) - f64::from(self.raw_at_4ma);
        let raw = f64::from(self.raw_at_4ma) + (current - LOOP_MIN_MA) * span / (LOOP_MAX_MA - LOOP_MIN_MA);
        let clamped = raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX));
        // Round half away from zero; the cast truncates toward zero.
        let nudged = if clamped >= 0.0 { clamped + 0.5 } else { clamped - 0.5 };
        nudged.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

impl Default for TwoPointCalibration {
    fn default() -> Self {
        Self {
            raw_at_4ma: 6_430,
            raw_at_20ma: 32_154,
            balance_ma: 4.025,
            full_scale_ma: 20.037,
            full_scale_psi: 1.0,
        }
    }
}

impl RawConverter for TwoPointCalibration {
    fn to_psi(&self, raw: i16) -> f64 {
        self.pressure_for_current(self.current_ma(raw))
    }
}

/// Point on a multipoint calibration curve.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationPoint {
    pub current_ma: f64,
    pub pressure_psi: f64,
}

impl CalibrationPoint {
    #[must_use]
    pub const fn new(current_ma: f64, pressure_psi: f64) -> Self {
        Self {
            current_ma,
            pressure_psi,
        }
    }
}

/// Errors raised while building a calibration table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// Table already holds [`MAX_CALIBRATION_POINTS`].
    TableFull,
    /// Point is not finite.
    NonFinite,
    /// Point's current duplicates an existing point.
    DuplicateCurrent,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::TableFull => f.write_str("calibration table is full"),
            CalibrationError::NonFinite => f.write_str("calibration point is not finite"),
            CalibrationError::DuplicateCurrent => {
                f.write_str("calibration point duplicates an existing current")
            }
        }
    }
}

/// Quality summary of a multipoint calibration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationReport {
    pub point_count: usize,
    /// Pressure span covered by the points.
    pub coverage_psi: f64,
    /// Coefficient of determination of a straight-line fit through the points.
    pub r_squared: f64,
}

impl CalibrationReport {
    /// Returns `true` when the curve is usable for production tests.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        self.point_count >= 2 && self.r_squared >= 0.99
    }
}

/// Piecewise-linear current-to-pressure curve, sorted by current.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint, MAX_CALIBRATION_POINTS>,
}

impl CalibrationTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Three-point curve of the reference 0-1 psi transducer.
    #[must_use]
    pub fn reference() -> Self {
        let mut table = Self::new();
        for point in [
            CalibrationPoint::new(4.025, 0.0),
            CalibrationPoint::new(12.029, 0.5),
            CalibrationPoint::new(20.037, 1.0),
        ] {
            // Three points never exceed the table capacity.
            let _ = table.insert(point);
        }
        table
    }

    /// Inserts a point, keeping the table sorted by current.
    pub fn insert(&mut self, point: CalibrationPoint) -> Result<(), CalibrationError> {
        if !point.current_ma.is_finite() || !point.pressure_psi.is_finite() {
            return Err(CalibrationError::NonFinite);
        }
        if self
            .points
            .iter()
            .any(|existing| (existing.current_ma - point.current_ma).abs() < f64::EPSILON)
        {
            return Err(CalibrationError::DuplicateCurrent);
        }

        let index = self
            .points
            .iter()
            .position(|existing| existing.current_ma > point.current_ma)
            .unwrap_or(self.points.len());
        self.points
            .insert(index, point)
            .map_err(|_| CalibrationError::TableFull)
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Interpolated pressure, clamped to the table's end points outside the range.
    #[must_use]
    pub fn pressure_for_current(&self, current_ma: f64) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if current_ma <= first.current_ma {
            return Some(first.pressure_psi);
        }
        if current_ma >= last.current_ma {
            return Some(last.pressure_psi);
        }

        self.points.windows(2).find_map(|pair| {
            let (low, high) = (pair[0], pair[1]);
            (current_ma <= high.current_ma).then(|| {
                let fraction = (current_ma - low.current_ma) / (high.current_ma - low.current_ma);
                low.pressure_psi + fraction * (high.pressure_psi - low.pressure_psi)
            })
        })
    }

    /// Summarizes point count, pressure coverage, and linearity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn report(&self) -> CalibrationReport {
        let count = self.points.len();
        let (min_psi, max_psi) = self.points.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(low, high), point| (low.min(point.pressure_psi), high.max(point.pressure_psi)),
        );
        let coverage_psi = if count == 0 { 0.0 } else { max_psi - min_psi };

        let r_squared = if count < 2 {
            0.0
        } else {
            let n = count as f64;
            let mean_x = self.points.iter().map(|p| p.current_ma).sum::<f64>() / n;
            let mean_y = self.points.iter().map(|p| p.pressure_psi).sum::<f64>() / n;
            let (sxy, sxx, syy) = self.points.iter().fold((0.0, 0.0, 0.0), |(sxy, sxx, syy), p| {
                let dx = p.current_ma - mean_x;
                let dy = p.pressure_psi - mean_y;
                (sxy + dx * dy, sxx + dx * dx, syy + dy * dy)
            });
            if sxx == 0.0 || syy == 0.0 {
                0.0
            } else {
                (sxy * sxy) / (sxx * syy)
            }
        };

        CalibrationReport {
            point_count: count,
            coverage_psi,
            r_squared,
        }
    }
}

/// Raw-count converter combining the ADC scaling of a two-point calibration
/// with a multipoint pressure curve.
#[derive(Clone, Debug, PartialEq)]
pub struct TableCalibration {
    pub adc: TwoPointCalibration,
    pub table: CalibrationTable,
}

impl RawConverter for TableCalibration {
    fn to_psi(&self, raw: i16) -> f64 {
        let current = self.adc.current_ma(raw);
        self.table
            .pressure_for_current(current)
            .unwrap_or_else(|| self.adc.pressure_for_current(current))
            .max(0.0)
    }
}
