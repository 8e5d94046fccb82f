//! Configuration management for zreplica
//!
//! Settings are layered:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)
//!
//! Command-line flags are applied on top by the CLI.

use crate::logging::LogRotation;
use crate::vm::StorageMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zreplica_common::{RetentionPolicy, DEFAULT_RETENTION};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZreplicaConfig {
    /// Retention and run behaviour
    pub replication: ReplicationConfig,
    /// Replica host
    pub remote: RemoteConfig,
    /// Local paths
    pub paths: PathsConfig,
    /// Storage id to ZFS pool mapping
    pub storage: StorageMap,
    /// Logging configuration
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Reserved snapshots kept locally, and the incremental chain depth
    pub retention: u32,
    /// Push the sanitized VM configuration after a clean run
    pub sync_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `[user@]host` of the replica
    pub host: Option<String>,
    /// Parent dataset on the replica; unset keeps local dataset paths
    pub pool: Option<String>,
    /// Directory for VM configuration files on the replica
    pub conf_dir: PathBuf,
    /// Extra arguments passed to ssh
    pub ssh_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `<vmid>.conf`
    pub conf_dir: PathBuf,
    /// Directory for per-VM run locks
    pub lock_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Enable file logging
    pub file_logging_enabled: bool,
    /// Log file rotation (hourly, daily, never)
    pub rotation: LogRotation,
    /// Write the log file as JSON lines
    pub json: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            sync_config: true,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            pool: None,
            conf_dir: PathBuf::from("/etc/pve/qemu-server"),
            ssh_options: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/pve/qemu-server"),
            lock_dir: PathBuf::from("/run/lock"),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/zreplica"),
            file_logging_enabled: false,
            rotation: LogRotation::Daily,
            json: true,
        }
    }
}

impl ZreplicaConfig {
    /// Load configuration from an explicit file, or the standard locations,
    /// then apply environment overrides
    pub fn load(explicit: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("ZREPLICA_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/zreplica/config.toml")),
            Some(PathBuf::from("./zreplica.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ZREPLICA_REMOTE_HOST") {
            self.remote.host = Some(host);
        }
        if let Ok(retention) = std::env::var("ZREPLICA_RETENTION") {
            if let Ok(retention) = retention.parse() {
                self.replication.retention = retention;
            }
        }
        if let Ok(path) = std::env::var("ZREPLICA_LOCK_DIR") {
            self.paths.lock_dir = PathBuf::from(path);
        }

        // Logging
        if let Ok(level) = std::env::var("ZREPLICA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var("ZREPLICA_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(path);
            self.logging.file_logging_enabled = true;
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.replication.retention)
    }

    /// Remote path of the configuration file for `vm_id`
    pub fn remote_conf_path(&self, vm_id: &str) -> String {
        self.remote
            .conf_dir
            .join(format!("{}.conf", vm_id))
            .to_string_lossy()
            .into_owned()
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let mut config = Self::default();
        config.remote.host = Some("root@backup01".to_string());
        config
            .storage
            .pools
            .insert("local-zfs".to_string(), "rpool/data".to_string());
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication.retention == 0 {
            return Err(ConfigError::Validation(
                "Retention must keep at least one snapshot".to_string(),
            ));
        }

        if let Some(host) = &self.remote.host {
            if host.trim().is_empty() || host.starts_with('-') {
                return Err(ConfigError::Validation(format!(
                    "Invalid remote host '{}'",
                    host
                )));
            }
        }

        Ok(())
    }

    /// Validate for a replication run, which needs a replica host
    pub fn validate_for_run(&self) -> Result<&str, ConfigError> {
        self.validate()?;
        self.remote
            .host
            .as_deref()
            .ok_or_else(|| ConfigError::Validation("No remote host configured".to_string()))
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Configuration validation failed
    #[error("Config validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for zreplica_common::Error {
    fn from(e: ConfigError) -> Self {
        zreplica_common::Error::InvalidConfig(e.to_string())
    }
}
