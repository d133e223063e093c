//! Process-wide tracing setup.
//!
//! Every run writes a timestamped log file at INFO (overridable through
//! `RUST_LOG`); the console only receives warnings and errors.

use crate::error::EtlError;
use chrono::Local;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// `etl_YYYYMMDD_HHMMSS.log` for the current local time.
pub fn log_file_name() -> String {
    Local::now().format("etl_%Y%m%d_%H%M%S.log").to_string()
}

/// Installs the global subscriber and returns the path of the log file.
///
/// # Errors
/// Fails when the log directory or file cannot be created, or when a global
/// subscriber is already installed.
pub fn init_logging(log_dir: &Path) -> Result<PathBuf, EtlError> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name());
    let file = File::create(&path)?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(LevelFilter::WARN),
        )
        .try_init()?;

    warn!("Logging to file: {}", path.display());
    Ok(path)
}
