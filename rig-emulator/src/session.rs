use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use leak_core::acquisition::{AcquisitionMode, Sample};
use leak_core::config::TestConfig;
use leak_core::evaluator::{Outcome, Verdict};
use leak_core::repl::catalog::{self, COMMANDS};
use leak_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome, OperatorControl};
use leak_core::repl::grammar::FaultKind;
use leak_core::status::{SequencerSnapshot, StatusFormatter, write_verdict};
use leak_core::telemetry::RunId;
use station::{StationError, StationHandle, StationStatus};

use crate::rig::Rig;

/// How the console should present a reply line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tone {
    Plain,
    Good,
    Notice,
    Bad,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reply {
    pub tone: Tone,
    pub text: String,
}

impl Reply {
    fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }

    fn plain(text: impl Into<String>) -> Self {
        Self::new(Tone::Plain, text)
    }
}

/// Station handle plus fault control over the simulated rig.
pub struct RigControl {
    station: StationHandle,
    rig: Rig,
}

impl RigControl {
    pub fn new(station: StationHandle, rig: Rig) -> Self {
        Self { station, rig }
    }

    /// Stops the control loop, releasing every output first.
    pub fn shutdown(self) -> StationStatus {
        self.station.shutdown()
    }
}

impl OperatorControl for RigControl {
    type Error = StationError;

    fn start_test(&mut self) -> Result<RunId, Self::Error> {
        self.station.start_test()
    }

    fn abort_test(&mut self) -> Result<bool, Self::Error> {
        self.station.abort_test()
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.station.reset()
    }

    fn status(&mut self) -> SequencerSnapshot {
        self.station.get_status().snapshot
    }

    fn config(&mut self) -> TestConfig {
        self.station.get_status().config
    }

    fn sample(&mut self, mode: AcquisitionMode) -> Result<Vec<Sample>, Self::Error> {
        self.station.sample(mode)
    }

    fn inject_fault(&mut self, kind: FaultKind) -> bool {
        self.rig.inject(kind);
        true
    }
}

/// One interactive operator session with an optional transcript.
pub struct Session {
    executor: CommandExecutor<RigControl>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(control: RigControl, transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        Ok(Self {
            executor: CommandExecutor::new(control),
            transcript,
            started_at: HostInstant::now(),
        })
    }

    pub fn into_control(self) -> RigControl {
        self.executor.into_inner()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Reply>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Host, trimmed)?;

        let replies = match self.executor.execute(trimmed) {
            Ok(outcome) => render_outcome(outcome),
            Err(CommandError::Parse(err)) => vec![Reply::new(Tone::Bad, format!("ERR syntax {err}"))],
            Err(CommandError::Unsupported(what)) => {
                vec![Reply::new(Tone::Bad, format!("ERR unsupported {what}"))]
            }
            Err(CommandError::Station(err)) => vec![Reply::new(Tone::Bad, format!("ERR {err}"))],
        };

        for reply in &replies {
            self.record(elapsed, TranscriptRole::Rig, &reply.text)?;
        }
        Ok(replies)
    }

    /// Records an unsolicited notice, such as a verdict arriving mid-prompt.
    pub fn note(&mut self, reply: &Reply) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        self.record(elapsed, TranscriptRole::Rig, &reply.text)
    }

    fn record(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }
}

/// Reply line announcing a finished run.
pub fn verdict_notice(run: RunId, verdict: &Verdict) -> Reply {
    let mut text = format!("run {run} ");
    let _ = write_verdict(&mut text, verdict);
    Reply::new(verdict_tone(verdict.outcome), text)
}

fn verdict_tone(outcome: Outcome) -> Tone {
    match outcome {
        Outcome::Pass => Tone::Good,
        Outcome::Fail(_) | Outcome::Error(_) => Tone::Bad,
    }
}

fn render_outcome(outcome: CommandOutcome<'_>) -> Vec<Reply> {
    match outcome {
        CommandOutcome::Started(run) => vec![Reply::new(Tone::Good, format!("OK started run={run}"))],
        CommandOutcome::AbortRequested => vec![Reply::new(Tone::Notice, "OK abort requested")],
        CommandOutcome::NothingToAbort => vec![Reply::plain("OK nothing to abort")],
        CommandOutcome::Reset => vec![Reply::new(Tone::Good, "OK reset, outputs verified off")],
        CommandOutcome::Status(snapshot) => render_status(&snapshot),
        CommandOutcome::Config(config) => render_config(&config),
        CommandOutcome::Samples { mode, samples } => vec![render_samples(mode, &samples)],
        CommandOutcome::FaultInjected(FaultKind::Clear) => {
            vec![Reply::new(Tone::Notice, "OK rig faults cleared")]
        }
        CommandOutcome::FaultInjected(kind) => {
            vec![Reply::new(Tone::Notice, format!("OK fault {kind} injected"))]
        }
        CommandOutcome::Help(topic) => render_help(topic),
    }
}

fn render_status(snapshot: &SequencerSnapshot) -> Vec<Reply> {
    let formatter = StatusFormatter::new(snapshot);
    let mut state = String::new();
    let mut pressure = String::new();
    let mut outputs = String::new();
    let mut verdict = String::new();
    let _ = formatter.write_state_line(&mut state);
    let _ = formatter.write_pressure_line(&mut pressure);
    let _ = formatter.write_outputs_line(&mut outputs);
    let _ = formatter.write_verdict_line(&mut verdict);

    let state_tone = if snapshot.overpressure_latched {
        Tone::Bad
    } else {
        Tone::Plain
    };
    let verdict_tone = snapshot
        .last_verdict
        .map_or(Tone::Plain, |verdict| verdict_tone(verdict.outcome));

    vec![
        Reply::new(state_tone, state),
        Reply::plain(pressure),
        Reply::plain(outputs),
        Reply::new(verdict_tone, verdict),
    ]
}

fn render_config(config: &TestConfig) -> Vec<Reply> {
    let timing = &config.timing;
    let pressure = &config.pressure;
    let safety = &config.safety;
    let acquisition = &config.acquisition;

    vec![
        Reply::plain(format!(
            "timing extend={} fill={} stabilize={} test={} exhaust={} retract={}",
            format_duration_short(timing.extend),
            format_duration_short(timing.fill),
            format_duration_short(timing.stabilize),
            format_duration_short(timing.test),
            format_duration_short(timing.exhaust),
            format_duration_short(timing.retract),
        )),
        Reply::plain(format!(
            "pressure target={:.3}psi tolerance={:.3}psi max_leak={:.4}psi/s min_test={:.3}psi",
            pressure.target_fill_psi,
            pressure.tolerance_psi,
            pressure.max_leak_rate_psi_per_s,
            pressure.min_test_psi,
        )),
        Reply::plain(format!(
            "safety overshoot={:.3}psi fill_attempts={} timeout={} poll={}",
            safety.overshoot_limit_psi,
            safety.max_fill_attempts,
            format_duration_short(safety.safety_timeout),
            format_duration_short(safety.poll_interval),
        )),
        Reply::plain(format!(
            "acquisition rate={}sps buffer={} window={} min_fraction={:.2} burst={}@{}sps",
            acquisition.target_rate_hz,
            acquisition.buffer_capacity,
            acquisition.rate_window,
            acquisition.min_window_fraction,
            acquisition.burst_count,
            acquisition.burst_rate_hz,
        )),
    ]
}

fn render_samples(mode: AcquisitionMode, samples: &[Sample]) -> Reply {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Reply::new(Tone::Notice, format!("{} no samples", mode.label()));
    };

    if samples.len() == 1 {
        return Reply::plain(format!(
            "{} {:.4}psi seq={}",
            mode.label(),
            first.pressure_psi,
            first.sequence_no
        ));
    }

    #[allow(clippy::cast_precision_loss)]
    let mean = samples.iter().map(|s| s.pressure_psi).sum::<f64>() / samples.len() as f64;
    let min = samples
        .iter()
        .map(|s| s.pressure_psi)
        .fold(f64::INFINITY, f64::min);
    let max = samples
        .iter()
        .map(|s| s.pressure_psi)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = last.timestamp.saturating_duration_since(first.timestamp);

    let mut text = format!("{} n={} span={}", mode.label(), samples.len(), format_duration_short(span));
    let _ = write!(text, " mean={mean:.4}psi min={min:.4}psi max={max:.4}psi");
    Reply::plain(text)
}

fn render_help(topic: Option<&str>) -> Vec<Reply> {
    match topic {
        Some(topic) => match catalog::find(topic) {
            Some(spec) => vec![Reply::plain(format!("{:<34}- {}", spec.usage, spec.summary))],
            None => vec![Reply::new(
                Tone::Bad,
                format!("ERR unknown help topic `{topic}`; topics: {}", help_topic_list()),
            )],
        },
        None => {
            let mut lines: Vec<Reply> = COMMANDS
                .iter()
                .map(|spec| Reply::plain(format!("{:<34}- {}", spec.usage, spec.summary)))
                .collect();
            lines.push(Reply::plain(format!("{:<34}- {}", "exit | quit", "leave the emulator")));
            lines
        }
    }
}

fn help_topic_list() -> String {
    COMMANDS
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Leak test rig emulator transcript")?;
        writeln!(self.writer, "# Timestamps are milliseconds since session start")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Rig,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Rig => "RIG <",
        }
    }
}

#[cfg(test)]
mod tests {
    use leak_core::calibration::TwoPointCalibration;
    use leak_core::evaluator::{ErrorReason, FailReason};
    use station::pipeline::Converter;
    use station::sinks::FanoutSink;
    use station::{AcquisitionPipeline, MonotonicClock, StationController};

    use super::*;
    use crate::rig::RigParams;

    fn session(transcript: Option<&Path>) -> Session {
        session_with(RigParams::default(), TestConfig::default(), transcript)
    }

    fn session_with(params: RigParams, config: TestConfig, transcript: Option<&Path>) -> Session {
        let clock = MonotonicClock::new();
        let rig = Rig::new(params, TwoPointCalibration::default(), clock, 1);
        let pipeline = AcquisitionPipeline::new(rig.sensor(), Converter::default(), clock);
        let station =
            StationController::spawn(rig.actuators(), pipeline, FanoutSink::new(), config, clock)
                .expect("station");
        Session::new(RigControl::new(station, rig), transcript).expect("session")
    }

    fn quick_config() -> TestConfig {
        let mut config = TestConfig::default();
        config.timing.extend = Duration::from_millis(50);
        config.timing.fill = Duration::from_millis(600);
        config.timing.stabilize = Duration::from_millis(100);
        config.timing.test = Duration::from_millis(600);
        config.timing.exhaust = Duration::from_millis(100);
        config.timing.retract = Duration::from_millis(50);
        config.safety.poll_interval = Duration::from_millis(10);
        config.safety.safety_timeout = Duration::from_secs(5);
        config.acquisition.target_rate_hz = 250;
        config.acquisition.min_window_fraction = 0.5;
        config
    }

    #[test]
    fn help_lists_every_command() {
        let mut session = session(None);
        let replies = session.handle_command("help").expect("help");
        assert_eq!(replies.len(), COMMANDS.len() + 1);
        assert!(replies[0].text.starts_with("start"));

        let replies = session.handle_command("help sample").expect("help topic");
        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("burst"));

        let replies = session.handle_command("help bogus").expect("unknown topic");
        assert_eq!(replies[0].tone, Tone::Bad);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = session(None);
        let replies = session.handle_command("launch").expect("reply");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].tone, Tone::Bad);
        assert!(replies[0].text.starts_with("ERR syntax"), "{}", replies[0].text);
    }

    #[test]
    fn status_renders_four_lines() {
        let mut session = session(None);
        let replies = session.handle_command("status").expect("status");
        assert_eq!(replies.len(), 4);
        assert!(replies[0].text.starts_with("state idle"), "{}", replies[0].text);
        assert!(replies[3].text.starts_with("verdict none"));
    }

    #[test]
    fn sensor_fault_surfaces_through_sampling() {
        let mut session = session(None);
        assert!(session.handle_command("sample").expect("sample")[0].text.starts_with("fast"));

        let replies = session.handle_command("fault sensor").expect("fault");
        assert_eq!(replies[0].tone, Tone::Notice);
        let replies = session.handle_command("sample").expect("sample");
        assert_eq!(replies[0].tone, Tone::Bad);

        session.handle_command("fault clear").expect("clear");
        let replies = session.handle_command("sample burst 8 250").expect("burst");
        assert!(replies[0].text.starts_with("burst n=8"), "{}", replies[0].text);
    }

    #[test]
    fn leaking_part_fails_on_rate() {
        let params = RigParams {
            fill_tau_s: 0.05,
            leak_psi_per_s: 0.2,
            noise_psi: 0.0,
            ..RigParams::default()
        };
        let mut session = session_with(params, quick_config(), None);

        let replies = session.handle_command("start").expect("start");
        assert_eq!(replies[0].text, "OK started run=1");

        let status = session
            .executor
            .control()
            .station
            .wait_for_verdict(Duration::from_secs(10))
            .expect("verdict");
        let verdict = status.snapshot.last_verdict.expect("verdict recorded");
        assert_eq!(verdict.outcome, Outcome::Fail(FailReason::LeakRateExceeded));
        assert!(verdict.leak_rate_psi_per_s.is_some_and(|rate| rate < -0.1));

        let replies = session.handle_command("status").expect("status");
        assert_eq!(replies[3].tone, Tone::Bad);
        assert!(replies[3].text.starts_with("verdict FAIL(leak-rate"), "{}", replies[3].text);
    }

    #[test]
    fn transcript_records_both_sides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.log");
        let mut session = session(Some(&path));
        session.handle_command("config").expect("config");
        session
            .note(&verdict_notice(
                1,
                &Verdict::without_window(Outcome::Error(ErrorReason::Aborted)),
            ))
            .expect("note");
        drop(session);

        let transcript = fs::read_to_string(&path).expect("read transcript");
        assert!(transcript.starts_with("# Leak test rig emulator transcript"));
        assert!(transcript.contains("HOST> config"));
        assert!(transcript.contains("RIG < timing extend=3.000s"));
        assert!(transcript.contains("RIG < run 1 verdict ERROR(aborted)"));
    }
}
