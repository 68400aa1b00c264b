//! Structured logging system
//!
//! This module provides structured logging with:
//! - JSON and text format support
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Time-based log rotation for file output
//! - Integration with tracing ecosystem

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logger instance that manages the logging system
///
/// Keep it alive for the lifetime of the process; dropping it flushes and
/// stops the background writer.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the logging system based on configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(std::io::stdout()),
            "stderr" => tracing_appender::non_blocking(std::io::stderr()),
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;
                let appender = create_rolling_appender(log_file, &config.rotation)?;
                tracing_appender::non_blocking(appender)
            }
            _ => {
                anyhow::bail!("Invalid output configuration: {}", config.output);
            }
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_ansi(config.output != "file")
                .with_target(true)
                .boxed(),
            _ => {
                anyhow::bail!("Invalid format configuration: {}", config.format);
            }
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger {
            _guard: Some(guard),
        })
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

fn parse_rotation(rotation: &str) -> Result<Rotation> {
    match rotation {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        _ => anyhow::bail!("Invalid rotation: {}", rotation),
    }
}

/// Create a rolling file appender next to `log_file`
fn create_rolling_appender(log_file: &Path, rotation: &str) -> Result<RollingFileAppender> {
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory).context("Failed to create log directory")?;

    let filename = log_file
        .file_name()
        .context("Log file must have a filename")?
        .to_str()
        .context("Log filename must be valid UTF-8")?;

    Ok(RollingFileAppender::new(
        parse_rotation(rotation)?,
        directory,
        filename,
    ))
}
