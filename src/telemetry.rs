//! Logging setup.

use std::path::Path;

use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("cannot open log file: {0}")]
    LogFile(#[from] std::io::Error),

    #[error("cannot set up log rotation: {0}")]
    Rotation(#[from] InitError),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

fn rotation(period: LogRotation) -> Rotation {
    match period {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
    }
}

/// Rolling appender for `config.file`. With rotation enabled, `lake.log`
/// becomes `lake.<period>.log` and only the newest `max_files` are kept.
fn log_file_appender(
    config: &LoggingConfig,
) -> Result<Option<RollingFileAppender>, TelemetryError> {
    let Some(path) = &config.file else {
        return Ok(None);
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .max_log_files(config.max_files.max(1));
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        builder = builder.filename_prefix(stem);
    }
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        builder = builder.filename_suffix(ext);
    }
    Ok(Some(builder.build(dir)?))
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `config.level`. Calling this a second time returns
/// [`TelemetryError::AlreadyInitialized`] and leaves the first subscriber in
/// place.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
            directive: config.level.clone(),
            reason: e.to_string(),
        })?,
    };

    let log_file = log_file_appender(config)?;
    let ansi = log_file.is_none();
    let writer = match log_file {
        Some(appender) => BoxMakeWriter::new(appender),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()
    };

    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
