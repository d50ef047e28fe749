//! Control loop thread and the operator handle that talks to it.
//!
//! The [`Sequencer`] lives on its own thread. Operators send
//! [`ControlMessage`]s over a `crossbeam-channel`; the loop waits for them
//! with `recv_timeout`, so a pending message is served immediately and the
//! wait doubles as the poll timer. After every poll or message the loop
//! publishes a [`StationStatus`] that readers copy out of an `RwLock`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant as HostInstant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use leak_core::acquisition::{Acquisition, AcquisitionMode, Sample};
use leak_core::config::TestConfig;
use leak_core::hardware::{ActuatorGateway, SensorGateway};
use leak_core::repl::commands::OperatorControl;
use leak_core::sequencer::{Sequencer, SequencerState, StartRejection};
use leak_core::status::SequencerSnapshot;
use leak_core::telemetry::RunId;
use leak_core::time::Instant;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::clock::MonotonicClock;
use crate::error::StationError;
use crate::pipeline::AcquisitionPipeline;
use crate::sinks::FanoutSink;

/// Depth of the operator command queue.
const CONTROL_QUEUE_DEPTH: usize = 16;

type Reply<T> = Sender<T>;

/// Requests served by the control loop.
pub enum ControlMessage {
    Start(Reply<Result<RunId, StartRejection>>),
    Abort(Reply<bool>),
    Reset(Reply<Result<(), StartRejection>>),
    Configure(TestConfig, Reply<Result<(), StartRejection>>),
    Sample(AcquisitionMode, Reply<Result<Vec<Sample>, StationError>>),
    Shutdown,
}

/// Last state published by the control loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StationStatus {
    pub snapshot: SequencerSnapshot,
    pub config: TestConfig,
    pub published_at: Instant,
    /// Completed sequencer polls since the loop started.
    pub polls: u64,
    /// `false` once the control loop has exited.
    pub online: bool,
}

impl StationStatus {
    fn initial(config: TestConfig) -> Self {
        Self {
            snapshot: SequencerSnapshot::idle(),
            config,
            published_at: Instant::ZERO,
            polls: 0,
            online: true,
        }
    }
}

type StationSequencer<A, S> = Sequencer<A, AcquisitionPipeline<S>, FanoutSink>;

/// Owns the sequencer on the control loop thread.
pub struct StationController<A, S>
where
    A: ActuatorGateway,
    S: SensorGateway + Send + 'static,
{
    sequencer: StationSequencer<A, S>,
    rx: Receiver<ControlMessage>,
    status: Arc<RwLock<StationStatus>>,
    clock: MonotonicClock,
    cancel: CancelToken,
    polls: u64,
}

impl<A, S> StationController<A, S>
where
    A: ActuatorGateway + Send + 'static,
    S: SensorGateway + Send + 'static,
{
    /// Validates `config`, builds the sequencer and starts the control loop.
    pub fn spawn(
        actuators: A,
        pipeline: AcquisitionPipeline<S>,
        sink: FanoutSink,
        config: TestConfig,
        clock: MonotonicClock,
    ) -> Result<StationHandle, StationError> {
        config
            .validate(pipeline.max_rate_hz())
            .map_err(StartRejection::InvalidConfig)?;

        let cancel = CancelToken::new();
        let pipeline = pipeline
            .with_rate_window(config.acquisition.rate_window)
            .with_capture_limit(config.acquisition.buffer_capacity)
            .with_capture_cancel(cancel.clone());
        let sequencer = Sequencer::new(actuators, pipeline, sink, config);
        if !sequencer.actuators().confirmed_off() {
            warn!("outputs could not be released at startup; start requests will be refused");
        }

        let (tx, rx) = crossbeam_channel::bounded(CONTROL_QUEUE_DEPTH);
        let status = Arc::new(RwLock::new(StationStatus::initial(config)));

        let mut controller = Self {
            sequencer,
            rx,
            status: Arc::clone(&status),
            clock,
            cancel: cancel.clone(),
            polls: 0,
        };
        controller.publish();

        let thread = thread::Builder::new()
            .name("leak-control".into())
            .spawn(move || controller.run())
            .map_err(|source| StationError::Spawn {
                name: "control loop",
                source,
            })?;

        Ok(StationHandle {
            tx,
            status,
            cancel,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        info!("control loop started");
        let mut next_poll = HostInstant::now();

        loop {
            let wait = next_poll.saturating_duration_since(HostInstant::now());
            match self.rx.recv_timeout(wait) {
                Ok(ControlMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(message) => self.handle(message),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let now = HostInstant::now();
            if now >= next_poll {
                self.poll();
                let interval = self.sequencer.context().config().safety.poll_interval;
                next_poll += interval;
                if next_poll < now {
                    next_poll = now + interval;
                }
            }
        }

        self.shut_down();
    }

    fn poll(&mut self) {
        let before = self.sequencer.state();
        let after = self.sequencer.poll(self.clock.now());
        self.polls += 1;
        if before != after {
            debug!(from = before.label(), to = after.label(), "sequencer state changed");
        }
        self.publish();
    }

    fn handle(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Start(reply) => {
                let result = self.sequencer.start_test(self.clock.now());
                match &result {
                    Ok(run) => info!(run, "test started"),
                    Err(rejection) => warn!(%rejection, "start rejected"),
                }
                self.publish();
                let _ = reply.send(result);
            }
            ControlMessage::Abort(reply) => {
                let requested = self.sequencer.request_abort();
                if requested {
                    info!(run = self.sequencer.context().run(), "abort requested");
                    self.poll();
                }
                let _ = reply.send(requested);
            }
            ControlMessage::Reset(reply) => {
                let result = self.sequencer.reset();
                if let Err(rejection) = &result {
                    warn!(%rejection, "reset refused");
                }
                self.publish();
                let _ = reply.send(result);
            }
            ControlMessage::Configure(config, reply) => {
                let result = self.sequencer.set_config(config);
                if result.is_ok() {
                    let pipeline = self.sequencer.acquisition_mut();
                    pipeline.set_rate_window(config.acquisition.rate_window);
                    pipeline.set_capture_limit(config.acquisition.buffer_capacity);
                    info!("configuration updated");
                }
                self.publish();
                let _ = reply.send(result);
            }
            ControlMessage::Sample(mode, reply) => {
                let result = if self.sequencer.state().is_running() {
                    Err(StationError::Rejected(StartRejection::Busy))
                } else {
                    self.sequencer
                        .acquisition_mut()
                        .acquire(mode)
                        .map_err(StationError::from)
                };
                if let Err(error) = &result {
                    warn!(%error, mode = mode.label(), "diagnostic capture failed");
                }
                let _ = reply.send(result);
            }
            ControlMessage::Shutdown => {}
        }
    }

    fn shut_down(&mut self) {
        if self.sequencer.request_abort() {
            self.poll();
        }
        if let Err(rejection) = self.sequencer.reset() {
            error!(%rejection, "could not confirm outputs off during shutdown");
        }
        self.publish();
        self.status.write().online = false;
        info!(polls = self.polls, "control loop stopped");
    }

    fn publish(&mut self) {
        let now = self.clock.now();
        let status = StationStatus {
            snapshot: self.sequencer.snapshot(now),
            config: *self.sequencer.context().config(),
            published_at: now,
            polls: self.polls,
            online: true,
        };
        *self.status.write() = status;
    }
}

/// Operator side of a running station.
pub struct StationHandle {
    tx: Sender<ControlMessage>,
    status: Arc<RwLock<StationStatus>>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl StationHandle {
    pub fn start_test(&self) -> Result<RunId, StationError> {
        self.request(ControlMessage::Start)?
            .map_err(StationError::from)
    }

    /// Returns `false` when no test was running.
    pub fn abort_test(&self) -> Result<bool, StationError> {
        self.request(ControlMessage::Abort)
    }

    pub fn reset(&self) -> Result<(), StationError> {
        self.request(ControlMessage::Reset)?
            .map_err(StationError::from)
    }

    /// Replaces the configuration used by subsequent tests.
    pub fn configure(&self, config: TestConfig) -> Result<(), StationError> {
        self.request(|reply| ControlMessage::Configure(config, reply))?
            .map_err(StationError::from)
    }

    /// Diagnostic capture; refused while a test runs.
    pub fn sample(&self, mode: AcquisitionMode) -> Result<Vec<Sample>, StationError> {
        self.request(|reply| ControlMessage::Sample(mode, reply))?
    }

    pub fn get_status(&self) -> StationStatus {
        *self.status.read()
    }

    /// Polls the published status until `predicate` holds or `timeout` passes.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&StationStatus) -> bool,
    ) -> Option<StationStatus> {
        let deadline = HostInstant::now() + timeout;
        loop {
            let status = self.get_status();
            if predicate(&status) {
                return Some(status);
            }
            if HostInstant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Waits for the current run to reach a terminal state.
    pub fn wait_for_verdict(&self, timeout: Duration) -> Option<StationStatus> {
        self.wait_for(timeout, |status| {
            matches!(
                status.snapshot.state,
                SequencerState::Complete(_) | SequencerState::EmergencyStop(_)
            ) || (status.snapshot.state == SequencerState::Idle
                && status.snapshot.last_verdict.is_some())
        })
    }

    /// Aborts any run, stops the control loop and waits for it to exit.
    ///
    /// A diagnostic capture in progress is cancelled. Outputs are released
    /// before the loop returns.
    pub fn shutdown(mut self) -> StationStatus {
        self.stop();
        self.get_status()
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        let _ = self.tx.try_send(ControlMessage::Shutdown);
        if thread.join().is_err() {
            error!("control loop panicked");
        }
    }

    fn request<T>(&self, message: impl FnOnce(Reply<T>) -> ControlMessage) -> Result<T, StationError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.tx
            .send(message(reply))
            .map_err(|_| StationError::ControlLoopGone)?;
        response.recv().map_err(|_| StationError::ControlLoopGone)
    }
}

impl Drop for StationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl OperatorControl for StationHandle {
    type Error = StationError;

    fn start_test(&mut self) -> Result<RunId, Self::Error> {
        StationHandle::start_test(self)
    }

    fn abort_test(&mut self) -> Result<bool, Self::Error> {
        StationHandle::abort_test(self)
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        StationHandle::reset(self)
    }

    fn status(&mut self) -> SequencerSnapshot {
        self.get_status().snapshot
    }

    fn config(&mut self) -> TestConfig {
        self.get_status().config
    }

    fn sample(&mut self, mode: AcquisitionMode) -> Result<Vec<Sample>, Self::Error> {
        StationHandle::sample(self, mode)
    }
}
