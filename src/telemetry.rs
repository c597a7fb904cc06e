use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Initialize logging.
///
/// When `config.enabled` is set, logs are appended to `config.log_path`
/// (with `~` expanded); otherwise they go to stdout. The `RUST_LOG`
/// environment variable overrides the default `info` filter.
///
/// # Errors
/// Returns error if the log file or its parent directory cannot be created.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(());
    }

    let log_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("logging initialized: {}", log_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    #[test]
    fn test_log_path_expansion() {
        let home = std::env::var("HOME").unwrap();
        let expanded = Config::expand_path("~/logs/voicekey.log").unwrap();
        assert_eq!(expanded, PathBuf::from(home).join("logs/voicekey.log"));
    }

    #[test]
    #[ignore = "global tracing subscriber can only be installed once per process"]
    fn test_init_with_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            enabled: true,
            log_path: dir
                .path()
                .join("voicekey.log")
                .to_string_lossy()
                .into_owned(),
        };
        init(&config).unwrap();
        assert!(dir.path().join("voicekey.log").exists());
    }
}
