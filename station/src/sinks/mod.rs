//! Result sinks for the host runtime.

mod results;

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use leak_core::acquisition::SampleWindow;
use leak_core::status::write_verdict;
use leak_core::telemetry::{EventRecord, ResultSink, RunId, TestEvent};
use tracing::{debug, error, info, warn};

use crate::error::StationError;

pub use results::{CsvResultSink, PRESSURE_DATA_FILE, SYSTEM_EVENTS_FILE, TEST_RESULTS_FILE};

/// Depth of the queue in front of a [`BackgroundSink`] writer.
pub const BACKGROUND_QUEUE_DEPTH: usize = 256;

/// Logs every record through `tracing`.
///
/// Verdicts log at `info` (a non-pass verdict at `warn`), safety trips at
/// `warn` and phase traffic at `debug`.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn emit(&mut self, record: &EventRecord) {
        let EventRecord {
            id, run, timestamp, ..
        } = *record;
        let at_us = timestamp.as_micros();
        match record.event {
            TestEvent::PhaseEntered(phase) => debug!(id, run, at_us, %phase, "phase entered"),
            TestEvent::PhaseExited(phase) => debug!(id, run, at_us, %phase, "phase exited"),
            TestEvent::FillRetry { attempt } => {
                info!(id, run, at_us, attempt, "fill pressure not reached; cycling fill valve");
            }
            TestEvent::SafetyTrip {
                reason,
                phase,
                pressure_psi,
            } => warn!(
                id,
                run,
                at_us,
                reason = reason.label(),
                phase = phase.map(|phase| phase.label()),
                pressure_psi,
                "safety trip"
            ),
            TestEvent::Verdict(verdict) => {
                let mut line = String::new();
                let _ = write_verdict(&mut line, &verdict);
                if verdict.outcome.is_pass() {
                    info!(id, run, at_us, "{line}");
                } else {
                    warn!(id, run, at_us, "{line}");
                }
            }
        }
    }

    fn record_window(&mut self, run: RunId, window: &SampleWindow) {
        debug!(
            run,
            samples = window.len(),
            span_ms = window.span().as_millis(),
            gaps = window.sequence_gaps(),
            "test window sealed"
        );
    }
}

/// Tees every record to a list of sinks, in insertion order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ResultSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl ResultSink + Send + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn push(&mut self, sink: impl ResultSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ResultSink for FanoutSink {
    fn emit(&mut self, record: &EventRecord) {
        for sink in &mut self.sinks {
            sink.emit(record);
        }
    }

    fn record_window(&mut self, run: RunId, window: &SampleWindow) {
        for sink in &mut self.sinks {
            sink.record_window(run, window);
        }
    }
}

/// Forwards records over a channel without ever blocking the control loop.
///
/// Records that do not fit are counted and discarded.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<EventRecord>,
    dropped: u64,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(tx: Sender<EventRecord>) -> Self {
        Self {
            tx,
            dropped: 0,
            disconnected: false,
        }
    }

    /// Records discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl ResultSink for ChannelSink {
    fn emit(&mut self, record: &EventRecord) {
        match self.tx.try_send(*record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                if !self.disconnected {
                    debug!("event channel closed; discarding further records");
                    self.disconnected = true;
                }
                self.dropped += 1;
            }
        }
    }
}

enum SinkMessage {
    Event(EventRecord),
    Window(RunId, SampleWindow),
}

/// Runs a slow sink on its own writer thread.
///
/// `emit` and `record_window` only enqueue; a full queue drops the record
/// and counts it. Dropping the sink closes the queue and joins the writer,
/// so everything queued before the drop reaches the inner sink.
pub struct BackgroundSink {
    tx: Option<Sender<SinkMessage>>,
    writer: Option<JoinHandle<()>>,
    dropped: u64,
}

impl BackgroundSink {
    pub fn spawn(
        name: &'static str,
        sink: impl ResultSink + Send + 'static,
    ) -> Result<Self, StationError> {
        Self::with_depth(name, sink, BACKGROUND_QUEUE_DEPTH)
    }

    pub fn with_depth(
        name: &'static str,
        mut sink: impl ResultSink + Send + 'static,
        depth: usize,
    ) -> Result<Self, StationError> {
        let (tx, rx) = crossbeam_channel::bounded(depth);
        let writer = thread::Builder::new()
            .name(name.into())
            .spawn(move || drain(&rx, &mut sink))
            .map_err(|source| StationError::Spawn { name, source })?;
        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
            dropped: 0,
        })
    }

    /// Records discarded because the writer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn enqueue(&mut self, message: SinkMessage) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(message) {
            self.dropped += 1;
            if self.dropped == 1 {
                let reason = match err {
                    TrySendError::Full(_) => "full",
                    TrySendError::Disconnected(_) => "closed",
                };
                warn!(reason, "result writer queue refused a record");
            }
        }
    }
}

fn drain(rx: &Receiver<SinkMessage>, sink: &mut impl ResultSink) {
    for message in rx {
        match message {
            SinkMessage::Event(record) => sink.emit(&record),
            SinkMessage::Window(run, window) => sink.record_window(run, &window),
        }
    }
}

impl ResultSink for BackgroundSink {
    fn emit(&mut self, record: &EventRecord) {
        self.enqueue(SinkMessage::Event(*record));
    }

    fn record_window(&mut self, run: RunId, window: &SampleWindow) {
        self.enqueue(SinkMessage::Window(run, window.clone()));
    }
}

impl Drop for BackgroundSink {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(Err(_)) = self.writer.take().map(JoinHandle::join) {
            error!("result writer panicked");
        }
        if self.dropped > 0 {
            warn!(dropped = self.dropped, "result records were discarded");
        }
    }
}
