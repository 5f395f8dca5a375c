//! Logging setup
//!
//! Human-readable output goes to stderr, filtered by `RUST_LOG` (default
//! `info`). Every event is also written as JSON to a daily-rotating file in
//! the log directory.

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directory for log files
pub const LOG_DIR: &str = "logs";

/// Prefix of the rotated log files
const LOG_FILE_PREFIX: &str = "handoff-agent.log";

/// Initialize logging into [`LOG_DIR`]
///
/// Keep the returned guard alive for the lifetime of the program; dropping
/// it flushes and stops the file writer.
pub fn init_logging() -> Result<WorkerGuard> {
    init_logging_in(LOG_DIR)
}

/// Initialize logging into `dir`
pub fn init_logging_in(dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!("[Logging] Writing logs to {:?}", dir);
    Ok(guard)
}
