//! Observability infrastructure: tracing and metrics.
//!
//! Binaries call [`init`] once at startup. Library code only emits
//! `tracing` events and `metrics` samples and never installs a subscriber
//! or recorder itself.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, ThinscanError};

pub mod metrics;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `log_file` is given,
/// events are appended to it instead of stderr so interactive progress
/// output stays readable.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ThinscanError::InvalidConfig {
            reason: format!("Invalid log level {}: {}", level, e),
        })?;

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ThinscanError::IoError {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ThinscanError::IoError { path: path.to_path_buf(), source: e })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer = if file_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ThinscanError::Internal(format!("Failed to initialize tracing: {}", e)))?;

    metrics::register_metrics();
    tracing::debug!("Observability initialized");
    Ok(())
}
