///! Local storage engine
///! Snapshot listing, destruction and send streams for datasets on this host

pub mod zfs;

use async_trait::async_trait;
use zreplica_common::Result;

pub use zfs::ZfsManager;

/// What to send: a full stream of `snapshot`, or the delta from `base` to `snapshot`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSpec {
    /// `dataset@snapshot`
    pub snapshot: String,
    /// `dataset@base` for an incremental stream
    pub base: Option<String>,
}

impl SendSpec {
    pub fn full(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            base: None,
        }
    }

    pub fn incremental(base: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            base: Some(base.into()),
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.base.is_some()
    }
}

/// Storage engine on the local host
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Snapshots of exactly this dataset, as `dataset@name`
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>>;

    /// Every snapshot in every pool, as `dataset@name`
    async fn list_all_snapshots(&self) -> Result<Vec<String>>;

    /// Destroy a snapshot and any dependents
    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()>;
}
