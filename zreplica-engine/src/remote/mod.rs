///! Remote replica host
///!
///! Storage-engine operations executed on the secondary host. Failures are
///! plain non-zero exits on the far side, surfaced as `Error::Command`.

pub mod ssh;

use crate::storage::SendSpec;
use async_trait::async_trait;
use zreplica_common::{Dataset, Result};

pub use ssh::SshTarget;

#[async_trait]
pub trait ReplicaTarget: Send + Sync {
    /// Name of the remote dataset mirroring `dataset`
    fn remote_dataset(&self, dataset: &Dataset) -> String {
        dataset.path.clone()
    }

    /// Snapshots of the remote dataset, as `dataset@name`
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>>;

    /// Destroy a remote snapshot and any dependents
    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()>;

    /// Stream `send` from the local pool into the remote dataset,
    /// force-overwriting remote state (`receive -F`)
    async fn receive(&self, send: &SendSpec, dataset: &str) -> Result<()>;

    /// Write a file on the remote host
    async fn push_file(&self, path: &str, contents: &str) -> Result<()>;
}
