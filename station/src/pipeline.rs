//! Threaded pressure acquisition.
//!
//! [`AcquisitionPipeline`] owns the sensor behind a mutex so that the control
//! loop can take a fast read while the sampling thread streams. A streaming
//! session lives in a second mutex; the sampling thread appends one sample per
//! lock, so readers never observe a half-written sample. `stop` cancels and
//! joins the thread before the session is sealed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use leak_core::acquisition::{
    Acquisition, AcquisitionError, AcquisitionMode, Pacer, Sample, SampleWindow, StreamRequest,
    StreamSession, validate_rate,
};
use leak_core::calibration::{RawConverter, TableCalibration, TwoPointCalibration};
use leak_core::config::{AcquisitionSettings, DEFAULT_RATE_WINDOW};
use leak_core::hardware::{Gain, HardwareError, SensorGateway};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicF64, Ordering};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::clock::MonotonicClock;

/// Raw-count converter selected by the station settings.
#[derive(Clone, Debug, PartialEq)]
pub enum Converter {
    TwoPoint(TwoPointCalibration),
    Table(TableCalibration),
}

impl Default for Converter {
    fn default() -> Self {
        Converter::TwoPoint(TwoPointCalibration::default())
    }
}

impl RawConverter for Converter {
    fn to_psi(&self, raw: i16) -> f64 {
        match self {
            Converter::TwoPoint(calibration) => calibration.to_psi(raw),
            Converter::Table(calibration) => calibration.to_psi(raw),
        }
    }
}

struct Shared<S> {
    sensor: Mutex<S>,
    session: Mutex<Option<StreamSession>>,
    streaming: AtomicBool,
    achieved_rate: AtomicF64,
    converter: Converter,
    clock: MonotonicClock,
}

impl<S: SensorGateway> Shared<S> {
    fn read(&self) -> Result<(f64, leak_core::time::Instant), HardwareError> {
        let reading = self.sensor.lock().read_raw()?;
        Ok((self.converter.to_psi(reading.raw), reading.timestamp))
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

/// Sensor front end with a dedicated sampling thread.
pub struct AcquisitionPipeline<S> {
    shared: Arc<Shared<S>>,
    worker: Option<Worker>,
    rate_window: usize,
    max_rate_hz: u32,
    fast_sequence: u64,
    /// Largest burst or diagnostic stream `acquire` will take.
    capture_limit: usize,
    /// Cuts short the waits inside `acquire`.
    capture_cancel: CancelToken,
}

impl<S> AcquisitionPipeline<S>
where
    S: SensorGateway + Send + 'static,
{
    pub fn new(sensor: S, converter: Converter, clock: MonotonicClock) -> Self {
        let max_rate_hz = sensor.max_rate_hz();
        Self {
            shared: Arc::new(Shared {
                sensor: Mutex::new(sensor),
                session: Mutex::new(None),
                streaming: AtomicBool::new(false),
                achieved_rate: AtomicF64::new(0.0),
                converter,
                clock,
            }),
            worker: None,
            rate_window: DEFAULT_RATE_WINDOW,
            max_rate_hz,
            fast_sequence: 0,
            capture_limit: AcquisitionSettings::default().buffer_capacity,
            capture_cancel: CancelToken::new(),
        }
    }

    /// Number of recent samples behind [`Acquisition::achieved_rate`].
    #[must_use]
    pub fn with_rate_window(mut self, rate_window: usize) -> Self {
        self.rate_window = rate_window;
        self
    }

    pub fn set_rate_window(&mut self, rate_window: usize) {
        self.rate_window = rate_window;
    }

    #[must_use]
    pub fn with_capture_limit(mut self, capture_limit: usize) -> Self {
        self.capture_limit = capture_limit;
        self
    }

    pub fn set_capture_limit(&mut self, capture_limit: usize) {
        self.capture_limit = capture_limit;
    }

    /// Token that aborts an in-progress [`acquire`](Self::acquire) when cancelled.
    #[must_use]
    pub fn with_capture_cancel(mut self, cancel: CancelToken) -> Self {
        self.capture_cancel = cancel;
        self
    }

    /// Runs `f` with exclusive access to the sensor.
    pub fn with_sensor<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.shared.sensor.lock())
    }

    /// Samples currently buffered by the running session.
    pub fn buffered(&self) -> usize {
        self.shared
            .session
            .lock()
            .as_ref()
            .map_or(0, StreamSession::buffered)
    }

    /// Captures samples in the requested mode on the calling thread.
    ///
    /// Streaming captures run until the requested capacity is filled and are
    /// refused while a session is already active, as are bursts. Burst counts
    /// and streaming capacities must lie in `1..=capture_limit`.
    pub fn acquire(&mut self, mode: AcquisitionMode) -> Result<Vec<Sample>, AcquisitionError> {
        match mode {
            AcquisitionMode::FastSingle => Ok(vec![self.read_fast()?]),
            AcquisitionMode::Burst { count, rate_hz } => {
                let count = usize::try_from(count).map_err(|_| AcquisitionError::InvalidCapacity)?;
                self.check_capture_size(count)?;
                self.burst(count, rate_hz)
            }
            AcquisitionMode::Streaming { rate_hz, capacity } => {
                self.check_capture_size(capacity)?;
                self.start(StreamRequest::new(rate_hz, capacity))?;
                let budget = capture_budget(rate_hz, capacity);
                let clock = self.shared.clock;
                let started = clock.elapsed();
                while self.buffered() < capacity && clock.elapsed() - started < budget {
                    if !self.capture_cancel.sleep(Duration::from_millis(10)) {
                        self.stop();
                        return Err(AcquisitionError::Cancelled);
                    }
                }
                Ok(self.stop().samples().to_vec())
            }
        }
    }

    fn check_capture_size(&self, size: usize) -> Result<(), AcquisitionError> {
        if size == 0 || size > self.capture_limit {
            warn!(size, limit = self.capture_limit, "capture size refused");
            return Err(AcquisitionError::InvalidCapacity);
        }
        Ok(())
    }

    fn burst(&mut self, count: usize, rate_hz: u32) -> Result<Vec<Sample>, AcquisitionError> {
        if self.worker.is_some() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        validate_rate(rate_hz, self.max_rate_hz)?;
        self.shared.sensor.lock().configure(rate_hz, Gain::default())?;

        let clock = self.shared.clock;
        let mut pacer = Pacer::new(rate_hz, clock.now());
        let mut samples = Vec::with_capacity(count);
        for sequence_no in (0_u64..).take(count) {
            let (psi, timestamp) = self.shared.read()?;
            samples.push(Sample::new(psi, timestamp, sequence_no));
            pacer.advance(clock.now());
            if !self.capture_cancel.sleep(pacer.remaining(clock.now())) {
                debug!(captured = samples.len(), count, "burst cancelled");
                return Err(AcquisitionError::Cancelled);
            }
        }

        debug!(count, rate_hz, overruns = pacer.overruns(), "burst captured");
        Ok(samples)
    }

    fn spawn_sampler(&self, rate_hz: u32, cancel: CancelToken) -> std::io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("leak-sampler".into())
            .spawn(move || sample_loop(&shared, rate_hz, &cancel))
    }
}

impl<S> Acquisition for AcquisitionPipeline<S>
where
    S: SensorGateway + Send + 'static,
{
    fn start(&mut self, request: StreamRequest) -> Result<(), AcquisitionError> {
        if self.worker.is_some() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        request.validate(self.max_rate_hz)?;
        self.shared
            .sensor
            .lock()
            .configure(request.target_rate_hz, Gain::default())?;

        *self.shared.session.lock() = Some(StreamSession::new(request, self.rate_window));
        self.shared.achieved_rate.store(0.0, Ordering::Relaxed);
        self.shared.streaming.store(true, Ordering::Release);

        let cancel = CancelToken::new();
        match self.spawn_sampler(request.target_rate_hz, cancel.clone()) {
            Ok(handle) => {
                self.worker = Some(Worker { handle, cancel });
                info!(
                    rate_hz = request.target_rate_hz,
                    capacity = request.buffer_capacity,
                    "streaming started"
                );
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to spawn sampling thread");
                self.shared.streaming.store(false, Ordering::Release);
                self.shared.session.lock().take();
                Err(AcquisitionError::Hardware(HardwareError::Unsupported))
            }
        }
    }

    fn stop(&mut self) -> SampleWindow {
        let Some(worker) = self.worker.take() else {
            return SampleWindow::empty();
        };
        worker.cancel.cancel();
        if worker.handle.join().is_err() {
            error!("sampling thread panicked");
        }
        self.shared.streaming.store(false, Ordering::Release);

        let Some(session) = self.shared.session.lock().take() else {
            return SampleWindow::empty();
        };
        let rate_hz = session.achieved_rate();
        self.shared.achieved_rate.store(rate_hz, Ordering::Relaxed);
        if session.dropped() > 0 {
            warn!(dropped = session.dropped(), "sample buffer overflowed");
        }
        let faults = session.faults_seen();
        let window = session.finish();
        info!(
            samples = window.len(),
            gaps = window.sequence_gaps(),
            faults,
            achieved_rate_hz = rate_hz,
            "streaming stopped"
        );
        window
    }

    fn read_fast(&mut self) -> Result<Sample, HardwareError> {
        let (psi, timestamp) = self.shared.read()?;
        let sample = Sample::new(psi, timestamp, self.fast_sequence);
        self.fast_sequence += 1;
        Ok(sample)
    }

    fn achieved_rate(&self) -> f64 {
        match self.shared.session.lock().as_ref() {
            Some(session) => session.achieved_rate(),
            None => self.shared.achieved_rate.load(Ordering::Relaxed),
        }
    }

    fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    fn latest(&self) -> Option<Sample> {
        self.shared.session.lock().as_ref().and_then(StreamSession::latest)
    }

    fn take_fault(&mut self) -> Option<HardwareError> {
        self.shared
            .session
            .lock()
            .as_mut()
            .and_then(StreamSession::take_fault)
    }

    fn overshoot(&self) -> Option<Sample> {
        self.shared
            .session
            .lock()
            .as_ref()
            .and_then(StreamSession::overshoot)
    }

    fn max_rate_hz(&self) -> u32 {
        self.max_rate_hz
    }
}

impl<S> Drop for AcquisitionPipeline<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            let _ = worker.handle.join();
        }
    }
}

fn sample_loop<S: SensorGateway>(shared: &Shared<S>, rate_hz: u32, cancel: &CancelToken) {
    let mut pacer = Pacer::new(rate_hz, shared.clock.now());

    while !cancel.is_cancelled() {
        let reading = shared.read();
        {
            let mut guard = shared.session.lock();
            let Some(session) = guard.as_mut() else {
                break;
            };
            match reading {
                Ok((psi, timestamp)) => {
                    session.record(psi, timestamp);
                }
                Err(error) => {
                    if session.faults_seen() == 0 {
                        warn!(%error, "sensor read failed while streaming");
                    }
                    session.record_fault(error);
                }
            }
        }

        pacer.advance(shared.clock.now());
        cancel.sleep(pacer.remaining(shared.clock.now()));
    }

    if pacer.overruns() > 0 {
        debug!(overruns = pacer.overruns(), "sampling loop fell behind schedule");
    }
}

/// Generous wall-clock allowance for filling `capacity` samples at `rate_hz`.
fn capture_budget(rate_hz: u32, capacity: usize) -> Duration {
    let nominal_ms = u64::try_from(capacity)
        .unwrap_or(u64::MAX)
        .saturating_mul(1_000)
        / u64::from(rate_hz.max(1));
    Duration::from_millis(nominal_ms.saturating_mul(2).saturating_add(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_budget_doubles_nominal_time() {
        assert_eq!(capture_budget(250, 500), Duration::from_millis(5_000));
        assert_eq!(capture_budget(0, 10), Duration::from_millis(21_000));
    }

    #[test]
    fn default_converter_is_two_point() {
        let converter = Converter::default();
        let calibration = TwoPointCalibration::default();
        let raw = calibration.raw_for_pressure(0.8);
        assert!((converter.to_psi(raw) - calibration.to_psi(raw)).abs() < f64::EPSILON);
    }
}
