mod rig;
mod session;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use crossbeam_channel::Receiver;
use crossterm::style::Stylize;
use leak_core::telemetry::{EventRecord, TestEvent};
use station::sinks::{BackgroundSink, ChannelSink, CsvResultSink, FanoutSink, TracingSink};
use station::{AcquisitionPipeline, MonotonicClock, Settings, StationController, StationError};
use tracing::{error, info};

use rig::{Rig, RigParams};
use session::{Reply, RigControl, Session, Tone, verdict_notice};

/// Interactive leak tester running against a simulated pneumatic rig.
#[derive(Debug, Parser)]
#[command(name = "rig-emulator", version)]
struct Args {
    /// Station settings file (TOML). Built-in defaults are used when omitted.
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Leak through the simulated part, in psi per second.
    #[arg(long, default_value_t = 0.0, value_name = "PSI_PER_S")]
    leak_rate: f64,

    /// Regulated supply pressure of the simulated rig.
    #[arg(long, value_name = "PSI")]
    supply: Option<f64>,

    /// Directory for CSV result files; overrides the settings file.
    #[arg(long, value_name = "DIR")]
    results: Option<PathBuf>,

    /// Write a HOST/RIG transcript of the session to this file.
    #[arg(long, value_name = "PATH")]
    transcript: Option<PathBuf>,

    /// Send log output to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Seed for the simulated sensor noise.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "emulator stopped");
            eprintln!("rig-emulator: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), StationError> {
    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match &args.log_file {
        Some(path) => station::logging::init_to_file(&settings.station.log_filter, path)?,
        None => station::logging::init(&settings.station.log_filter),
    }

    let config = settings.test_config()?;
    let converter = settings.converter()?;
    let results_dir = args
        .results
        .clone()
        .unwrap_or_else(|| settings.station.results_dir.clone());
    let transcript = args.transcript.clone().or_else(|| settings.station.transcript.clone());

    let mut params = RigParams {
        leak_psi_per_s: args.leak_rate.max(0.0),
        ..RigParams::default()
    };
    if let Some(supply) = args.supply {
        params.supply_psi = supply;
    }
    let seed = args.seed.unwrap_or_else(rand::random);

    let clock = MonotonicClock::new();
    let rig = Rig::new(params, settings.calibration.two_point(), clock, seed);
    let pipeline = AcquisitionPipeline::new(rig.sensor(), converter, clock);

    let (events_tx, events_rx) = crossbeam_channel::bounded(256);
    let sink = FanoutSink::new()
        .with(TracingSink)
        .with(BackgroundSink::spawn(
            "csv-writer",
            CsvResultSink::create(&results_dir)?,
        )?)
        .with(ChannelSink::new(events_tx));

    let station = StationController::spawn(rig.actuators(), pipeline, sink, config, clock)?;
    info!(
        results = %results_dir.display(),
        leak_rate = params.leak_psi_per_s,
        seed,
        "rig emulator ready"
    );

    let mut session = Session::new(RigControl::new(station, rig), transcript.as_deref())?;
    let (notices_tx, notices_rx) = crossbeam_channel::unbounded();
    let printer = thread::Builder::new()
        .name("verdict-printer".into())
        .spawn(move || print_verdicts(&events_rx, &notices_tx))
        .map_err(|source| StationError::Spawn {
            name: "verdict printer",
            source,
        })?;

    let result = repl(&mut session, &notices_rx);

    let status = session.into_control().shutdown();
    info!(polls = status.polls, "station stopped");
    let _ = printer.join();
    result.map_err(StationError::from)
}

fn repl(session: &mut Session, notices: &Receiver<Reply>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    // Unlocked so the verdict printer can interleave between prompts.
    let mut writer = io::stdout();
    let mut line = String::new();

    writeln!(
        writer,
        "Leak test rig emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        for notice in notices.try_iter() {
            session.note(&notice)?;
        }

        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for reply in session.handle_command(trimmed)? {
            print_reply(&mut writer, &reply)?;
        }
    }

    Ok(())
}

/// Prints verdicts as they arrive and hands them to the session transcript.
///
/// Returns once the station drops its end of the event channel.
fn print_verdicts(events: &Receiver<EventRecord>, notices: &crossbeam_channel::Sender<Reply>) {
    for record in events {
        if let TestEvent::Verdict(verdict) = record.event {
            let notice = verdict_notice(record.run, &verdict);
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout);
            let _ = print_reply(&mut stdout, &notice);
            let _ = write!(stdout, "> ");
            let _ = stdout.flush();
            let _ = notices.send(notice);
        }
    }
}

fn print_reply(writer: &mut impl Write, reply: &Reply) -> io::Result<()> {
    match reply.tone {
        Tone::Plain => writeln!(writer, "{}", reply.text),
        Tone::Good => writeln!(writer, "{}", reply.text.as_str().green()),
        Tone::Notice => writeln!(writer, "{}", reply.text.as_str().yellow()),
        Tone::Bad => writeln!(writer, "{}", reply.text.as_str().red().bold()),
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}
