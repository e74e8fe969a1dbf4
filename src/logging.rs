//! Logging configuration.
//!
//! Sets up tracing-based logging to stderr, optionally mirrored to a daily
//! rolling file when a log directory is configured.
//!
//! Log level can be controlled via the `FACESORT_LOG` environment variable:
//! - `FACESORT_LOG=debug` for verbose output
//! - `FACESORT_LOG=info` for standard output (default)
//! - `FACESORT_LOG=warn` for warnings and errors only

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system. Call once at startup.
pub fn init(log_dir: Option<PathBuf>, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env("FACESORT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = tracing_appender::rolling::daily(&log_dir, "facesort.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();

            tracing::debug!("Logging initialized with file backend at {:?}", log_dir);
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }

    Ok(())
}
