//! Tracing subscriber setup.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "AGRISYNC_LOG";

const LOG_FILE: &str = "agrisync.log";

/// Where log lines go.
#[derive(Debug, Clone)]
pub enum LogTarget<'a> {
  Stderr,
  /// Daily-rotated file inside this directory
  Directory(&'a Path),
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered lines on drop and must be held for
/// the lifetime of the process.
pub fn init(target: LogTarget<'_>) -> Result<WorkerGuard> {
  let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard, ansi) = match target {
    LogTarget::Stderr => {
      let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
      (writer, guard, true)
    }
    LogTarget::Directory(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (writer, guard, false)
    }
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(writer).with_ansi(ansi).with_target(false))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
