use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::config::{Config, LogFormat};

pub const LOG_FILE_PREFIX: &str = "stagegate.log";

/// Install the global subscriber: a daily rolling JSON file under the system
/// log directory plus a stderr layer that stays at `warn` unless verbose.
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// flushes the file writer on drop and must outlive the process's work.
pub fn init(config: &Config) -> Result<WorkerGuard> {
    config.ensure_directories()?;

    let file_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log level: {}", config.log_level))?,
    };
    let console_level = if config.verbose { "debug" } else { "warn" };
    let console_filter = EnvFilter::new(console_level);

    let appender = tracing_appender::rolling::daily(config.log_dir(), LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(file_filter);

    let registry = tracing_subscriber::registry().with(file_layer);
    match config.log_format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(console_filter),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(console_filter),
            )
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
