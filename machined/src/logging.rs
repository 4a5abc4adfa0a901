//! Tracing subscriber setup for machined binaries.
//!
//! Console output always; a daily-rolling file under `log_dir` when one is
//! configured. `RUST_LOG` overrides the default `info` filter.

use machined_shared::{MachinedError, MachinedResult};
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE_PREFIX: &str = "machined.log";

/// Keeps the file writer flushing for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init_logging(log_dir: Option<&Path>) -> MachinedResult<()> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let console = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                MachinedError::Config(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    // Another subscriber (e.g. from an embedding process) wins.
    if tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }

    if let Some(dir) = log_dir {
        tracing::info!(log_dir = %dir.display(), "Logging initialized");
    }
    Ok(())
}
