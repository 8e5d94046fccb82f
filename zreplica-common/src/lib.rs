//! Common types shared between zreplica-engine and zreplica-cli

pub mod snapshot;

pub use snapshot::{Snapshot, SnapshotKind, SNAPSHOT_PREFIX};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of reserved snapshots kept locally
pub const DEFAULT_RETENTION: u32 = 5;

/// One snapshot-capable storage volume attached to a virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Configuration key the volume hangs off, e.g. `scsi0` or `efidisk0`
    pub slot: String,
    /// Storage-engine identifier, e.g. `rpool/data/vm-100-disk-0`
    pub path: String,
    /// Display name (volume name)
    pub label: String,
}

impl Dataset {
    pub fn new(slot: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let label = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            slot: slot.into(),
            path,
            label,
        }
    }

    /// `dataset@snapshot`
    pub fn snapshot_path(&self, snapshot_name: &str) -> String {
        format!("{}@{}", self.path, snapshot_name)
    }
}

/// How many reserved snapshots to keep, and how deep an incremental chain may grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep: u32,
}

impl RetentionPolicy {
    pub fn new(keep: u32) -> Self {
        Self { keep }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep: DEFAULT_RETENTION,
        }
    }
}

/// Transfer protocol actually used for one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Full,
    Incremental,
    IncrementalFallbackToFull,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
            Self::IncrementalFallbackToFull => write!(f, "incremental->full"),
        }
    }
}

/// Result of replicating one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    SkippedNoLocalSnapshot,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::SkippedNoLocalSnapshot => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Virtual machine not found: {0}")]
    VmNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Snapshot listing failed: {0}")]
    SnapshotListing(String),

    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("{mode} transfer of {dataset} failed: {message}")]
    Transfer {
        dataset: String,
        mode: TransferMode,
        message: String,
    },

    #[error("Another run holds the lock {0}")]
    Locked(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
