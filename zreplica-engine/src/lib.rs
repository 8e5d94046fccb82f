//! zreplica engine
//!
//! Snapshot-based replication of a VM's ZFS datasets to a secondary host:
//! full/incremental decision, per-dataset transfer with fallback, local
//! chain retention, and the command-line collaborators (qm, zfs, ssh).

mod command;

// Core modules
pub mod config;
pub mod lock;
pub mod logging;

// Collaborators
pub mod remote;
pub mod storage;
pub mod vm;

// Replication
pub mod replication;

pub use config::{ConfigError, ZreplicaConfig};
pub use remote::{ReplicaTarget, SshTarget};
pub use replication::{ConfigSync, ModeRequest, Replicator, RunContext, RunReport};
pub use storage::{SendSpec, SnapshotStore, ZfsManager};
pub use vm::{Hypervisor, QmCli, SnapshotCatalog, VmConfigSource};
