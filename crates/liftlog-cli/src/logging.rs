//! File logging setup.

use anyhow::{Context, Result};
use liftlog_core::config::paths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initializes tracing with an env-filter and a daily-rolling log file
/// under `${LIFTLOG_HOME}/logs`. The returned guard must live for the
/// whole process so buffered lines are flushed on exit.
pub fn init() -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("liftlog=info,liftlog_core=info"))
        .context("build log filter")?;

    let appender = tracing_appender::rolling::daily(paths::logs_dir(), "liftlog.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
