//! Logging configuration using tracing
//!
//! Console output plus a daily-rolling file under the configured logs dir.
//! Level is controlled by the `AUTOREJOIN_LOG` environment variable:
//!
//! ```bash
//! AUTOREJOIN_LOG=debug autorejoin-rs run
//! ```

use crate::error::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the filter directive
pub const LOG_ENV: &str = "AUTOREJOIN_LOG";

/// Log file prefix; the appender adds a `.YYYY-MM-DD` suffix
pub const LOG_FILE_NAME: &str = "autorejoin.log";

/// Install the global subscriber
///
/// Keep the returned guard alive for the life of the process, dropping it
/// flushes the file writer.
pub fn init(logs_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string())),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("cannot install logger: {}", e)))?;

    tracing::debug!("Logging to {}", logs_dir.join(LOG_FILE_NAME).display());
    Ok(guard)
}
