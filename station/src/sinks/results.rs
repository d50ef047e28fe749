use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use leak_core::acquisition::SampleWindow;
use leak_core::evaluator::Verdict;
use leak_core::pneumatics::TestPhase;
use leak_core::telemetry::{EventRecord, ResultSink, RunId, TestEvent};
use leak_core::time::Instant;
use serde::Serialize;
use tracing::warn;

pub const TEST_RESULTS_FILE: &str = "test_results.csv";
pub const PRESSURE_DATA_FILE: &str = "pressure_data.csv";
pub const SYSTEM_EVENTS_FILE: &str = "system_events.csv";

/// One row of `test_results.csv`.
#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    timestamp_us: u64,
    run: RunId,
    result: &'a str,
    reason: Option<&'a str>,
    duration_s: Option<f64>,
    start_psi: Option<f64>,
    end_psi: Option<f64>,
    pressure_drop_psi: Option<f64>,
    leak_rate_psi_per_s: Option<f64>,
    peak_psi: Option<f64>,
    samples: usize,
    sequence_gaps: u64,
}

/// One row of `pressure_data.csv`.
#[derive(Debug, Serialize)]
struct PressureRow {
    run: RunId,
    sequence_no: u64,
    timestamp_us: u64,
    elapsed_s: f64,
    pressure_psi: f64,
}

/// One row of `system_events.csv`.
#[derive(Debug, Serialize)]
struct EventRow<'a> {
    timestamp_us: u64,
    run: RunId,
    level: &'a str,
    event: &'a str,
    details: String,
}

/// Appends verdicts, sealed windows and safety events to CSV files in one
/// directory.
///
/// A file gets its header row only when it is created, so results accumulate
/// across sessions. Write failures are logged and counted; they never reach
/// the sequencer. Every call writes and flushes on the caller's thread; wrap
/// the sink in a [`BackgroundSink`](super::BackgroundSink) to keep that off
/// the control loop.
pub struct CsvResultSink {
    dir: PathBuf,
    results: Writer<File>,
    pressure: Writer<File>,
    events: Writer<File>,
    run_started: Option<(RunId, Instant)>,
    write_failures: u64,
}

impl CsvResultSink {
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            results: open_appending(&dir.join(TEST_RESULTS_FILE))?,
            pressure: open_appending(&dir.join(PRESSURE_DATA_FILE))?,
            events: open_appending(&dir.join(SYSTEM_EVENTS_FILE))?,
            dir,
            run_started: None,
            write_failures: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rows that could not be written.
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    fn write_verdict(&mut self, record: &EventRecord, verdict: &Verdict) -> csv::Result<()> {
        let duration_s = match self.run_started {
            Some((run, started)) if run == record.run => {
                Some(record.timestamp.seconds_since(started))
            }
            _ => None,
        };
        self.results.serialize(ResultRow {
            timestamp_us: record.timestamp.as_micros(),
            run: record.run,
            result: verdict.outcome.headline(),
            reason: verdict.outcome.reason_label(),
            duration_s,
            start_psi: verdict.start_pressure_psi,
            end_psi: verdict.end_pressure_psi,
            pressure_drop_psi: verdict.pressure_drop_psi(),
            leak_rate_psi_per_s: verdict.leak_rate_psi_per_s,
            peak_psi: verdict.peak_pressure_psi,
            samples: verdict.sample_count,
            sequence_gaps: verdict.sequence_gaps,
        })?;
        self.results.flush()?;
        Ok(())
    }

    fn write_event(&mut self, record: &EventRecord, level: &str) -> csv::Result<()> {
        self.events.serialize(EventRow {
            timestamp_us: record.timestamp.as_micros(),
            run: record.run,
            level,
            event: record.event.label(),
            details: record.event.to_string(),
        })?;
        self.events.flush()?;
        Ok(())
    }

    fn write_window(&mut self, run: RunId, window: &SampleWindow) -> csv::Result<()> {
        let origin = window.first().map_or(Instant::ZERO, |sample| sample.timestamp);
        for sample in window {
            self.pressure.serialize(PressureRow {
                run,
                sequence_no: sample.sequence_no,
                timestamp_us: sample.timestamp.as_micros(),
                elapsed_s: sample.timestamp.seconds_since(origin),
                pressure_psi: sample.pressure_psi,
            })?;
        }
        self.pressure.flush()?;
        Ok(())
    }

    fn note_failure(&mut self, file: &str, result: csv::Result<()>) {
        if let Err(error) = result {
            self.write_failures += 1;
            warn!(%error, file, dir = %self.dir.display(), "failed to append result row");
        }
    }
}

impl ResultSink for CsvResultSink {
    fn emit(&mut self, record: &EventRecord) {
        match record.event {
            TestEvent::PhaseEntered(phase) if phase == TestPhase::FIRST => {
                self.run_started = Some((record.run, record.timestamp));
            }
            TestEvent::FillRetry { .. } => {
                let result = self.write_event(record, "INFO");
                self.note_failure(SYSTEM_EVENTS_FILE, result);
            }
            TestEvent::SafetyTrip { .. } => {
                let result = self.write_event(record, "WARNING");
                self.note_failure(SYSTEM_EVENTS_FILE, result);
            }
            TestEvent::Verdict(verdict) => {
                let result = self.write_verdict(record, &verdict);
                self.note_failure(TEST_RESULTS_FILE, result);
            }
            TestEvent::PhaseEntered(_) | TestEvent::PhaseExited(_) => {}
        }
    }

    fn record_window(&mut self, run: RunId, window: &SampleWindow) {
        let result = self.write_window(run, window);
        self.note_failure(PRESSURE_DATA_FILE, result);
    }
}

/// Opens `path` for appending; the header row is written only into a new file.
fn open_appending(path: &Path) -> io::Result<Writer<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fresh = file.metadata()?.len() == 0;
    Ok(WriterBuilder::new().has_headers(fresh).from_writer(file))
}

#[cfg(test)]
mod tests {
    use leak_core::acquisition::Sample;
    use leak_core::evaluator::{ErrorReason, Outcome};

    use super::*;

    fn record(id: u32, millis: u64, event: TestEvent) -> EventRecord {
        EventRecord {
            id,
            run: 7,
            timestamp: Instant::from_millis(millis),
            event,
        }
    }

    fn aborted(id: u32, millis: u64) -> EventRecord {
        record(
            id,
            millis,
            TestEvent::Verdict(Verdict::without_window(Outcome::Error(ErrorReason::Aborted))),
        )
    }

    #[test]
    fn header_is_written_once_across_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        for id in 1..=2 {
            let mut sink = CsvResultSink::create(dir.path()).expect("open");
            sink.emit(&aborted(id, 1_000));
        }

        let results = fs::read_to_string(dir.path().join(TEST_RESULTS_FILE)).expect("read");
        let lines: Vec<&str> = results.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp_us,run,result,reason,duration_s"));
        assert!(lines[1..].iter().all(|line| line.starts_with("1000000,7,ERROR,aborted,")));
    }

    #[test]
    fn error_verdict_has_reason_and_duration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = CsvResultSink::create(dir.path()).expect("open");
        let trip = TestEvent::SafetyTrip {
            reason: ErrorReason::Aborted,
            phase: Some(TestPhase::Filling),
            pressure_psi: None,
        };

        sink.emit(&record(1, 1_000, TestEvent::PhaseEntered(TestPhase::Extending)));
        sink.emit(&record(2, 3_500, trip));
        sink.emit(&aborted(3, 3_500));

        let results = fs::read_to_string(dir.path().join(TEST_RESULTS_FILE)).expect("read");
        let row = results.lines().nth(1).expect("verdict row");
        assert_eq!(row, "3500000,7,ERROR,aborted,2.5,,,,,,0,0");

        let events = fs::read_to_string(dir.path().join(SYSTEM_EVENTS_FILE)).expect("read");
        let mut reader = csv::Reader::from_reader(events.as_bytes());
        let rows: Vec<csv::StringRecord> = reader
            .records()
            .collect::<Result<_, _>>()
            .expect("event rows");
        assert_eq!(rows.len(), 1);
        let fields: Vec<&str> = rows[0].iter().collect();
        let details = trip.to_string();
        assert_eq!(
            fields,
            ["3500000", "7", "WARNING", "safety-trip", details.as_str()]
        );
        assert_eq!(sink.write_failures(), 0);
    }

    #[test]
    fn window_rows_carry_elapsed_seconds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = CsvResultSink::create(dir.path()).expect("open");
        let window = SampleWindow::seal(vec![
            Sample::new(0.81, Instant::from_millis(2_000), 0),
            Sample::new(0.80, Instant::from_millis(2_500), 1),
        ]);

        sink.record_window(7, &window);

        let data = fs::read_to_string(dir.path().join(PRESSURE_DATA_FILE)).expect("read");
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(
            lines,
            [
                "run,sequence_no,timestamp_us,elapsed_s,pressure_psi",
                "7,0,2000000,0.0,0.81",
                "7,1,2500000,0.5,0.8",
            ]
        );
    }
}
