//! Logging Module
//!
//! Initializes the tracing subscriber: console output always, plus a daily
//! rolling log file when a log directory is configured. The filter honors
//! RUST_LOG and falls back to the configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::{Result, UploadError};

/// Initialize global logging.
///
/// Returns the file appender's worker guard, which the caller must keep
/// alive for the lifetime of the process so buffered log lines are flushed.
pub fn initialize(config: &Config) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                UploadError::ConfigError(format!(
                    "failed to create log directory {:?}: {}",
                    dir, e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, "filedrop.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| UploadError::SystemError(format!("failed to initialize logging: {}", e)))?;

    Ok(guard)
}
