///! Local chain retention
///!
///! Pruning works on VM-level snapshots (all disks are revisioned together),
///! and only after every dataset has been transferred.

use crate::vm::{Hypervisor, SnapshotCatalog};
use serde::Serialize;
use tracing::{info, warn};
use zreplica_common::{RetentionPolicy, Snapshot, SnapshotKind};

/// Outcome of the effecting delete step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Snapshots to delete after `new_name` (of kind `new_kind`) was created.
///
/// 1. A new full snapshot supersedes the whole prior chain.
/// 2. Beyond that, only the newest `policy.keep` snapshots stay.
pub fn plan_prune(
    catalog: &SnapshotCatalog,
    new_name: &str,
    policy: &RetentionPolicy,
    new_kind: SnapshotKind,
) -> Vec<Snapshot> {
    let mut remaining: Vec<Snapshot> = catalog.iter().cloned().collect();
    let mut to_delete = Vec::new();

    if new_kind == SnapshotKind::Full && remaining.len() > 1 {
        let (keep, drop): (Vec<_>, Vec<_>) =
            remaining.into_iter().partition(|s| s.name == new_name);
        remaining = keep;
        to_delete.extend(drop);
    }

    let keep = policy.keep as usize;
    if remaining.len() > keep {
        // `remaining` is oldest first
        let excess = remaining.len() - keep;
        to_delete.extend(remaining.drain(..excess));
    }

    to_delete.sort();
    to_delete
}

/// Delete the planned snapshots, continuing past individual failures
pub async fn prune(hypervisor: &dyn Hypervisor, vm_id: &str, plan: &[Snapshot]) -> PruneResult {
    let mut result = PruneResult::default();

    for snapshot in plan {
        match hypervisor.delete_snapshot(vm_id, &snapshot.name).await {
            Ok(()) => {
                info!(vm_id = %vm_id, snapshot = %snapshot.name, "Pruned local snapshot");
                result.deleted.push(snapshot.name.clone());
            }
            Err(e) => {
                warn!(vm_id = %vm_id, snapshot = %snapshot.name, "Failed to prune snapshot: {}", e);
                result.failed.push((snapshot.name.clone(), e.to_string()));
            }
        }
    }

    result
}
