///! SSH replica target
///!
///! Pipes `zfs send` into `ssh <host> zfs receive -F` and runs remote
///! list/destroy commands over the same connection settings.

use super::ReplicaTarget;
use crate::command;
use crate::storage::{SendSpec, ZfsManager};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{error, info};
use zreplica_common::{Dataset, Error, Result};

/// Replica host reached over SSH
#[derive(Debug, Clone)]
pub struct SshTarget {
    host: String,
    ssh_binary: String,
    /// Parent dataset on the remote; `None` keeps local paths unchanged
    pool: Option<String>,
    ssh_options: Vec<String>,
    zfs: ZfsManager,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ssh_binary: "ssh".to_string(),
            pool: None,
            ssh_options: Vec::new(),
            zfs: ZfsManager::new(),
        }
    }

    pub fn with_pool(mut self, pool: Option<String>) -> Self {
        self.pool = pool.filter(|p| !p.is_empty());
        self
    }

    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    /// Local storage engine the send side runs on
    pub fn with_zfs(mut self, zfs: ZfsManager) -> Self {
        self.zfs = zfs;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.args(&self.ssh_options);
        cmd.arg(&self.host);
        cmd
    }
}

#[async_trait]
impl ReplicaTarget for SshTarget {
    fn remote_dataset(&self, dataset: &Dataset) -> String {
        match &self.pool {
            Some(pool) => format!("{}/{}", pool.trim_end_matches('/'), dataset.label),
            None => dataset.path.clone(),
        }
    }

    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let stdout = command::run(
            self.ssh()
                .arg("zfs")
                .arg("list")
                .arg("-H")
                .arg("-t")
                .arg("snapshot")
                .arg("-d")
                .arg("1")
                .arg("-o")
                .arg("name")
                .arg(dataset),
        )
        .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.contains('@'))
            .map(str::to_string)
            .collect())
    }

    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()> {
        if !snapshot.contains('@') {
            return Err(Error::Validation(format!(
                "Refusing to destroy {} on {}: not a snapshot",
                snapshot, self.host
            )));
        }

        info!(host = %self.host, snapshot = %snapshot, "Destroying remote snapshot");
        command::run(self.ssh().arg("zfs").arg("destroy").arg("-r").arg(snapshot)).await?;
        Ok(())
    }

    async fn receive(&self, send: &SendSpec, dataset: &str) -> Result<()> {
        info!(
            host = %self.host,
            snapshot = %send.snapshot,
            remote = %dataset,
            incremental = send.is_incremental(),
            "Streaming snapshot to replica"
        );

        let mut send_child = self.zfs.send_snapshot(send)?;

        let mut send_stdout = send_child
            .stdout
            .take()
            .ok_or_else(|| Error::System("Failed to capture send stdout".to_string()))?;
        let mut send_stderr = send_child
            .stderr
            .take()
            .ok_or_else(|| Error::System("Failed to capture send stderr".to_string()))?;

        let mut ssh_cmd = self.ssh();
        ssh_cmd
            .arg("zfs")
            .arg("receive")
            .arg("-F")
            .arg(dataset)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut ssh_child = ssh_cmd
            .spawn()
            .map_err(|e| Error::System(format!("Failed to start ssh receive: {}", e)))?;

        let mut ssh_stdin = ssh_child
            .stdin
            .take()
            .ok_or_else(|| Error::System("Failed to capture ssh stdin".to_string()))?;

        // Stream, never buffer: a full send can be the whole volume
        let pump = async move {
            let copied = tokio::io::copy(&mut send_stdout, &mut ssh_stdin).await;

            // Both pipe ends close here, so neither process can block on the other
            drop(ssh_stdin);
            drop(send_stdout);
            if copied.is_err() {
                // Receiver went away mid-stream
                let _ = send_child.start_kill();
            }

            (copied, send_child.wait().await)
        };

        let drain = async move {
            let mut err = String::new();
            let _ = send_stderr.read_to_string(&mut err).await;
            err
        };

        let ((copied, send_status), send_err, received) =
            tokio::join!(pump, drain, ssh_child.wait_with_output());

        let output = received.map_err(|e| Error::System(format!("Failed to wait for ssh: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(host = %self.host, remote = %dataset, "ZFS receive failed: {}", stderr);
            return Err(Error::Command {
                command: format!("ssh {} zfs receive -F {}", self.host, dataset),
                message: stderr,
            });
        }

        let send_status =
            send_status.map_err(|e| Error::System(format!("Failed to wait for send: {}", e)))?;
        if !send_status.success() {
            error!(snapshot = %send.snapshot, "ZFS send failed: {}", send_err.trim());
            return Err(Error::Command {
                command: format!("zfs send {}", send.snapshot),
                message: send_err.trim().to_string(),
            });
        }

        let bytes = copied
            .map_err(|e| Error::System(format!("Failed to copy send stream: {}", e)))?;
        info!(remote = %dataset, bytes, "Snapshot received by replica");

        Ok(())
    }

    async fn push_file(&self, path: &str, contents: &str) -> Result<()> {
        info!(host = %self.host, path = %path, "Pushing file to replica");

        let mut ssh_cmd = self.ssh();
        ssh_cmd
            .arg(format!("cat > '{}'", path.replace('\'', "'\\''")))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = ssh_cmd
            .spawn()
            .map_err(|e| Error::System(format!("Failed to start ssh: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::System("Failed to capture ssh stdin".to_string()))?;
        let written = stdin.write_all(contents.as_bytes()).await;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::System(format!("Failed to wait for ssh: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Command {
                command: format!("ssh {} cat > {}", self.host, path),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;

        Ok(())
    }
}
