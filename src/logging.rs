//! Logging initialization for playbook.
//!
//! Server mode: logs to `<logs>/playbook-{datetime}.log` when `logging.to_file` is set
//! CLI mode: logs to stderr

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Result of logging initialization
pub struct LoggingHandle {
    /// Flushes buffered file logs when dropped; keep alive for the whole run
    pub _guard: Option<WorkerGuard>,

    /// Path to the log file (only set in server mode with file logging enabled)
    pub log_file_path: Option<PathBuf>,
}

/// Filter directive: `--debug` beats the configured level
fn level_directive(config: &Config, debug_override: bool) -> String {
    if debug_override {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    }
}

/// Log file name for a server run started now
fn log_file_name() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    format!("playbook-{timestamp}.log")
}

/// Whether this run writes to a file rather than stderr
fn logs_to_file(config: &Config, is_server_mode: bool) -> bool {
    is_server_mode && config.logging.to_file
}

/// Initialize logging based on mode and configuration.
///
/// `RUST_LOG` overrides the configured level. The returned handle must be kept
/// alive for the duration of the program.
pub fn init_logging(
    config: &Config,
    is_server_mode: bool,
    debug_override: bool,
) -> Result<LoggingHandle> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or(level_directive(config, debug_override)),
    );

    if logs_to_file(config, is_server_mode) {
        let logs_dir = config.logs_path();
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

        let log_filename = log_file_name();
        let log_file_path = logs_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&logs_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();

        Ok(LoggingHandle {
            _guard: Some(guard),
            log_file_path: Some(log_file_path),
        })
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        Ok(LoggingHandle {
            _guard: None,
            log_file_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.logs = temp_dir.path().join("logs").to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_logs_path_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let logs_dir = config.logs_path();
        assert!(logs_dir.ends_with("logs"));
        assert!(logs_dir.starts_with(temp_dir.path()));
    }

    #[test]
    fn test_log_file_name_format() {
        let name = log_file_name();
        assert!(name.starts_with("playbook-"));
        assert!(name.ends_with("Z.log"));
    }

    #[test]
    fn test_debug_override_wins() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.logging.level = "warn".to_string();

        assert_eq!(level_directive(&config, false), "warn");
        assert_eq!(level_directive(&config, true), "debug");
    }

    #[test]
    fn test_only_server_mode_logs_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);

        config.logging.to_file = true;
        assert!(logs_to_file(&config, true));
        assert!(!logs_to_file(&config, false));

        config.logging.to_file = false;
        assert!(!logs_to_file(&config, true));
    }
}
