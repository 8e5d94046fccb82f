///! Virtual machine side: snapshot control, configuration file and catalog

pub mod catalog;
pub mod config;
pub mod qm;

use async_trait::async_trait;
use zreplica_common::Result;

pub use catalog::SnapshotCatalog;
pub use config::{resolve_datasets, sanitize_vm_config, StorageMap, VmConfigSource};
pub use qm::QmCli;

/// Virtualization control interface.
/// Snapshots created here cover every snapshot-capable disk of the VM at once.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Raw snapshot listing, one record per line. A VM without snapshots
    /// yields an empty (or prefix-less) listing, not an error.
    async fn list_snapshots(&self, vm_id: &str) -> Result<Vec<String>>;

    async fn create_snapshot(&self, vm_id: &str, name: &str, description: &str) -> Result<()>;

    async fn delete_snapshot(&self, vm_id: &str, name: &str) -> Result<()>;
}
