//! Logging setup shared by both daemons.
//!
//! Events go to stdout and to a daily rotated file `<daemon>.<date>.log` in
//! the configured directory. `RUST_LOG` overrides the configured levels.

use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

/// Keeps the file writer alive. Dropping it flushes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Filter directives for the configured levels.
///
/// The DICOM networking crate gets its own level since it is chatty at debug.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.to_ascii_lowercase();
    let network = config.network_level.to_ascii_lowercase();
    format!("{},rtqueue={},dicom_ul={}", level, level, network)
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the rolling file appender cannot be created or a subscriber is
/// already installed.
pub fn init_logging(daemon: &str, config: &LoggingConfig) -> Result<LoggingGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(daemon)
        .filename_suffix("log")
        .max_log_files(config.days_to_keep)
        .build(&config.dir)
        .map_err(|e| PipelineError::Logging(e.to_string()))?;
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| PipelineError::Logging(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn directives_include_network_level() {
        let config = LoggingConfig {
            dir: PathBuf::from("/tmp"),
            level: "DEBUG".to_string(),
            days_to_keep: 7,
            network_level: "Warn".to_string(),
        };
        let directives = filter_directives(&config);
        assert_eq!(directives, "debug,rtqueue=debug,dicom_ul=warn");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
