use super::Hypervisor;
use crate::command;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use zreplica_common::{Error, Result};

/// `qm` command-line front end of the QEMU/KVM host
#[derive(Debug, Clone)]
pub struct QmCli {
    binary: String,
}

impl QmCli {
    pub fn new() -> Self {
        Self {
            binary: "qm".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for QmCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for QmCli {
    async fn list_snapshots(&self, vm_id: &str) -> Result<Vec<String>> {
        let stdout = command::run(Command::new(&self.binary).arg("listsnapshot").arg(vm_id))
            .await
            .map_err(|e| Error::SnapshotListing(format!("VM {}: {}", vm_id, e)))?;

        Ok(stdout.lines().map(str::to_string).collect())
    }

    async fn create_snapshot(&self, vm_id: &str, name: &str, description: &str) -> Result<()> {
        info!(vm_id = %vm_id, snapshot = %name, "Creating VM snapshot");

        command::run(
            Command::new(&self.binary)
                .arg("snapshot")
                .arg(vm_id)
                .arg(name)
                .arg("--description")
                .arg(description),
        )
        .await?;

        Ok(())
    }

    async fn delete_snapshot(&self, vm_id: &str, name: &str) -> Result<()> {
        info!(vm_id = %vm_id, snapshot = %name, "Deleting VM snapshot");

        command::run(
            Command::new(&self.binary)
                .arg("delsnapshot")
                .arg(vm_id)
                .arg(name),
        )
        .await?;

        Ok(())
    }
}
