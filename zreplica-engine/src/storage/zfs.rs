//! ZFS storage backend
//! Snapshot listing, destruction and `zfs send` streams

use super::{SendSpec, SnapshotStore};
use crate::command;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::info;
use zreplica_common::{Error, Result};

/// ZFS storage manager
#[derive(Debug, Clone)]
pub struct ZfsManager {
    binary: String,
}

impl ZfsManager {
    pub fn new() -> Self {
        Self {
            binary: "zfs".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if ZFS is available
    pub fn check_zfs_available() -> bool {
        std::process::Command::new("zfs")
            .arg("version")
            .output()
            .is_ok()
    }

    /// Get ZFS version
    pub async fn get_zfs_version() -> Result<String> {
        let stdout = command::run(Command::new("zfs").arg("version")).await?;
        Ok(stdout.lines().next().unwrap_or("Unknown").to_string())
    }

    /// Start `zfs send` with stdout piped, for streaming into a receiver
    pub fn send_snapshot(&self, send: &SendSpec) -> Result<Child> {
        info!(
            snapshot = %send.snapshot,
            base = send.base.as_deref().unwrap_or("-"),
            "Sending ZFS snapshot"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.arg("send");

        if let Some(base) = &send.base {
            cmd.arg("-i").arg(base);
        }

        cmd.arg(&send.snapshot)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| Error::System(format!("Failed to start ZFS send: {}", e)))
    }

    fn parse_names(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.contains('@'))
            .map(str::to_string)
            .collect()
    }
}

impl Default for ZfsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for ZfsManager {
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let stdout = command::run(
            Command::new(&self.binary)
                .arg("list")
                .arg("-H")
                .arg("-t")
                .arg("snapshot")
                .arg("-d")
                .arg("1")
                .arg("-o")
                .arg("name")
                .arg("-s")
                .arg("name")
                .arg(dataset),
        )
        .await?;

        Ok(Self::parse_names(&stdout))
    }

    async fn list_all_snapshots(&self) -> Result<Vec<String>> {
        let stdout = command::run(
            Command::new(&self.binary)
                .arg("list")
                .arg("-H")
                .arg("-t")
                .arg("snapshot")
                .arg("-o")
                .arg("name"),
        )
        .await?;

        Ok(Self::parse_names(&stdout))
    }

    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()> {
        if !snapshot.contains('@') {
            // `zfs destroy -r` on a bare dataset would take the volume with it
            return Err(Error::Validation(format!(
                "Refusing to destroy {}: not a snapshot",
                snapshot
            )));
        }

        info!(snapshot = %snapshot, "Destroying ZFS snapshot");
        command::run(Command::new(&self.binary).arg("destroy").arg("-r").arg(snapshot)).await?;
        Ok(())
    }
}
