//! Log setup: stderr by default, a daily-rotated file when configured.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When logging to a
/// file the returned guard must be held until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log level {}: {}", config.level, e))?;

  match &config.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("story-offline.log");

      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_target(true).with_writer(writer))
        .try_init()?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalid_level_is_rejected() {
    // Only meaningful when RUST_LOG does not override the configured level
    if std::env::var_os("RUST_LOG").is_some() {
      return;
    }
    let config = LoggingConfig {
      level: "story_offline=loud".to_string(),
      file: None,
    };
    assert!(init(&config).is_err());
  }
}
