//! `tracing` subscriber setup.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::StationError;

/// Installs a compact stderr subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Calling this twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init(default_filter: &str) {
    let filter = env_filter(default_filter);
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::NONE)
        .compact();

    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}

/// Installs a subscriber that appends plain text to `path`.
///
/// Used by interactive front-ends whose terminal belongs to the operator.
pub fn init_to_file(default_filter: &str, path: &Path) -> Result<(), StationError> {
    let file = File::options().create(true).append(true).open(path)?;
    let layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(layer)
        .try_init();
    Ok(())
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::settings::DEFAULT_LOG_FILTER))
}
