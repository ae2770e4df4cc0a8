//! Tracing setup.
//!
//! Builds the `tracing` dispatcher described by a [`LoggingConfig`] and wraps
//! it in a [`LogContext`] that is handed to camera sessions and stream
//! engines. Several independently configured contexts can coexist in one
//! process; [`install_global`] additionally makes one the process default.
//!
//! `FLIPRO_LOG` (an `EnvFilter` directive such as `flipro_storage=trace`)
//! overrides the configured level when set.
//!
//! # Example
//! ```no_run
//! use flipro_daq::{config::FliproConfig, telemetry};
//! use tracing::info;
//!
//! # fn main() -> Result<(), flipro_daq::FliproError> {
//! let config = FliproConfig::load()?;
//! let log = telemetry::build(&config.logging)?;
//! telemetry::install_global(&log);
//! info!("application started");
//! # Ok(())
//! # }
//! ```

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AppResult, FliproError};
use flipro_core::{LogContext, LogLevel};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};

/// Environment variable holding an `EnvFilter` override.
pub const FILTER_ENV: &str = "FLIPRO_LOG";

/// Build a logging context from configuration.
pub fn build(config: &LoggingConfig) -> AppResult<LogContext> {
    let level = config.log_level().ok_or_else(|| {
        FliproError::Configuration(format!("Invalid log level '{}'", config.level))
    })?;
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let (writer, to_file) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| FliproError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), true)
        }
        None => (BoxMakeWriter::new(std::io::stderr), false),
    };
    let ansi = config.with_ansi && !to_file;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer.with_filter(filter));
    Ok(LogContext::new(Dispatch::new(subscriber)))
}

/// Build a stderr context at `level` with default formatting.
pub fn with_level(level: LogLevel) -> AppResult<LogContext> {
    build(&LoggingConfig {
        level: level.as_filter().to_string(),
        ..LoggingConfig::default()
    })
}

/// Make `log` the process-wide default dispatcher.
///
/// Idempotent: returns `false` without error when a global dispatcher was
/// already installed, which is expected in tests.
pub fn install_global(log: &LogContext) -> bool {
    tracing::dispatcher::set_global_default(log.dispatch().clone()).is_ok()
}
