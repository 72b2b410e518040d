//! Logging setup and on-disk locations for Roadmap Flow binaries.
//!
//! File output goes through `tracing-appender`'s daily-rolling writer on a
//! background thread; the returned [`LogGuard`] must be held for the
//! process lifetime or buffered lines are lost on exit. This crate also
//! owns the Roadmap Flow home directory, since the log directory and the
//! default database live under it.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "roadmap=info,roadmap_api=info,roadmap_actions=info,roadmap_sheets=info,roadmap_db=info";

/// Logging configuration shared by the `api`, `worker`, and `run` entry points.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Keeps the background log writer alive. Dropping it flushes and stops
/// file logging, so bind it for the duration of `main`.
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Initialize tracing: daily-rolling file output plus a stderr layer.
///
/// `RUST_LOG` overrides the file filter; the console stays at `warn`
/// unless `verbose` is set.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_appender =
        tracing_appender::rolling::daily(&log_dir, log_file_name(config.app_name));
    let (file_writer, worker) = tracing_appender::non_blocking(file_appender);

    let console_filter = if config.verbose {
        default_filter()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(default_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(LogGuard { _worker: worker })
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// The Roadmap Flow home directory.
///
/// Resolution order: `ROADMAP_HOME`, then the platform-local data directory
/// (`~/.local/share/roadmap-flow` on Linux), then `./.roadmap_flow` for
/// containers with no resolvable data directory.
pub fn roadmap_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("ROADMAP_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("roadmap-flow"))
        .unwrap_or_else(|| PathBuf::from(".roadmap_flow"))
}

/// Logs directory under the home.
pub fn logs_dir() -> PathBuf {
    roadmap_home().join("logs")
}

/// Default database URL when `ROADMAP_DB_URL` is unset: a SQLite file
/// under the home directory.
pub fn default_db_url() -> String {
    format!("sqlite:{}", roadmap_home().join("roadmap_flow.db").display())
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// File name prefix for the rolling appender. The date suffix comes from
/// the appender; the prefix only needs to be filesystem-safe.
fn log_file_name(app_name: &str) -> String {
    let safe: String = app_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if safe.is_empty() {
        "roadmap.log".to_string()
    } else {
        format!("{safe}.log")
    }
}
