// Tracing setup for the command-line front end.
//
// The library itself only emits events; the binary calls `init_logging` once
// and keeps the returned guard alive so buffered file output is flushed.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the `EnvFilter` directive.
pub const LOG_ENV: &str = "MEDREC_LOG";

const LOG_FILE_PREFIX: &str = "medrec.log";
const MAX_LOG_FILES: usize = 3;

/// Install the global subscriber: daily-rotated file log plus warnings on stderr.
pub fn init_logging(log_dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    let log_dir = log_dir.as_ref();
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter)
        .with_context(|| format!("Invalid {} directive: {}", LOG_ENV, filter))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr.with_max_level(Level::WARN))
                .with_target(false)
                .without_time(),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(filter_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(log_dir = %log_dir.display(), "Tracing is configured for console and file logging");
    Ok(guard)
}

/// Marks the start of a run in the log.
pub fn log_banner() {
    tracing::info!("==================================================");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Medical records processing started");
    tracing::info!("==================================================");
}
