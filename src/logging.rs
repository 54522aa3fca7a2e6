//! Tracing subscriber setup.
//!
//! Console output goes to stderr as plain text (or JSON lines when enabled).
//! A daily rolling log file under the configured log directory keeps the last
//! few files for post-mortem analysis.
//!
//! The filter is taken from `BEAMLINE_LOG`, then `RUST_LOG`, then the level in
//! [`LogSettings`].

use std::fs;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{AppResult, DeviceError};
use crate::settings::LogSettings;

const LOG_ENV: &str = "BEAMLINE_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

fn build_filter(default_level: &str) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using {default_level}");
            EnvFilter::new(default_level)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    }
}

/// Installs the global subscriber.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
pub fn init_tracing(service_name: &str, settings: &LogSettings) -> AppResult<()> {
    fs::create_dir_all(&settings.directory)?;

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(format!("{}-{}", settings.file_prefix, service_name))
        .filename_suffix("log")
        .max_log_files(settings.max_files)
        .build(&settings.directory)
        .map_err(|e| DeviceError::LogInit(e.to_string()))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(file_guard);

    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(build_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %settings.directory.display(), "tracing initialised");
    Ok(())
}
