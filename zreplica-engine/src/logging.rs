///! Logging configuration module
///! Console output plus an optional rotated log file

use crate::config::LoggingSettings;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,          // log level (trace, debug, info, warn, error)
    pub log_dir: Option<PathBuf>,  // directory for zreplica.log, None for console only
    pub rotation: LogRotation,  // log rotation policy
    pub json_format: bool,      // JSON lines in the file layer
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            rotation: LogRotation::Daily,
            json_format: true,
        }
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            log_dir: settings
                .file_logging_enabled
                .then(|| settings.log_dir.clone()),
            rotation: settings.rotation,
            json_format: settings.json,
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Initialize logging. Keep the returned guard alive until exit so the
    /// file writer flushes.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
        // Console goes to stderr; stdout carries command output
        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_ansi(true)
            .with_writer(io::stderr);

        let guard = if let Some(ref dir) = self.log_dir {
            std::fs::create_dir_all(dir)?;

            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(dir, "zreplica.log"),
                LogRotation::Daily => rolling::daily(dir, "zreplica.log"),
                LogRotation::Never => rolling::never(dir, "zreplica.log"),
            };
            let (writer, guard) = non_blocking(file_appender);

            let file_layer = if self.json_format {
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer)
                    .boxed()
            } else {
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed()
            };

            tracing_subscriber::registry()
                .with(self.env_filter())
                .with(console_layer)
                .with(file_layer)
                .try_init()?;
            Some(guard)
        } else {
            tracing_subscriber::registry()
                .with(self.env_filter())
                .with(console_layer)
                .try_init()?;
            None
        };

        tracing::debug!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }
}
