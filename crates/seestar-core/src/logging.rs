//! Logging configuration using tracing

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

const LOG_FILE_NAME: &str = "seestar.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/seestar/logs/`
/// Log level is controlled by `SEESTAR_LOG` environment variable.
///
/// # Examples
/// ```bash
/// SEESTAR_LOG=debug cargo test
/// SEESTAR_LOG=seestar_device=trace cargo test
/// ```
pub fn init() -> Result<()> {
    init_in(&get_log_directory())
}

/// Initialize logging into an explicit directory.
///
/// Fails if a global subscriber is already installed.
pub fn init_in(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);

    // Default to info, allow override via SEESTAR_LOG
    let env_filter = EnvFilter::try_from_env("SEESTAR_LOG")
        .unwrap_or_else(|_| EnvFilter::new("seestar=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("logging already initialised: {e}")))?;

    tracing::info!("Seestar client logging to {}", log_dir.display());

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("seestar").join("logs")
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> PathBuf {
    get_log_directory().join(LOG_FILE_NAME)
}
