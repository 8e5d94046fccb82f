//! Snapshot catalog
//!
//! Chronological view of a VM's reserved snapshots. Always built from a fresh
//! hypervisor listing; nothing is cached between calls because a run creates
//! and deletes snapshots as it goes.

use super::Hypervisor;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;
use zreplica_common::{Result, Snapshot, SnapshotKind};

/// Ordered (oldest first) set of reserved snapshots for one VM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotCatalog {
    snapshots: Vec<Snapshot>,
}

impl SnapshotCatalog {
    /// Read the VM's snapshot listing. A failing listing command is fatal
    /// for the run; an empty listing is just an empty catalog.
    pub async fn load(hypervisor: &dyn Hypervisor, vm_id: &str) -> Result<Self> {
        let lines = hypervisor.list_snapshots(vm_id).await?;
        let catalog = Self::from_listing(lines.iter().map(String::as_str));
        debug!(vm_id = %vm_id, count = catalog.len(), "Loaded snapshot catalog");
        Ok(catalog)
    }

    /// Build from listing records. Each record's first field (after any tree
    /// drawing) is the snapshot name; non-reserved names are dropped.
    pub fn from_listing<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let set: BTreeSet<Snapshot> = lines
            .into_iter()
            .filter_map(|line| {
                line.trim_start_matches(|c: char| {
                    c.is_whitespace() || matches!(c, '`' | '-' | '>' | '|')
                })
                .split_whitespace()
                .next()
            })
            .filter_map(Snapshot::parse)
            .collect();

        Self {
            snapshots: set.into_iter().collect(),
        }
    }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        let set: BTreeSet<Snapshot> = snapshots.into_iter().collect();
        Self {
            snapshots: set.into_iter().collect(),
        }
    }

    /// Oldest first
    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshots.iter().any(|s| s.name == name)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Most recent FULL snapshot
    pub fn last_full(&self) -> Option<&Snapshot> {
        self.snapshots.iter().rev().find(|s| s.is_full())
    }

    /// INCREMENTAL snapshots strictly newer than `timestamp`
    pub fn incrementals_since(&self, timestamp: &str) -> usize {
        self.snapshots
            .iter()
            .filter(|s| s.kind == SnapshotKind::Incremental && s.timestamp.as_str() > timestamp)
            .count()
    }
}

impl<'a> IntoIterator for &'a SnapshotCatalog {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}
