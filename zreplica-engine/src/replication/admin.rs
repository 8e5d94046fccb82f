//! Administrative modes
//!
//! Both bypass the decide/transfer pipeline and never contact the replica.

use crate::storage::SnapshotStore;
use crate::vm::{Hypervisor, SnapshotCatalog};
use serde::Serialize;
use tracing::{info, warn};
use zreplica_common::{Result, Snapshot};

/// Outcome of a delete or purge
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl AdminReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every reserved snapshot of one VM
pub async fn delete_all(hypervisor: &dyn Hypervisor, vm_id: &str) -> Result<AdminReport> {
    let catalog = SnapshotCatalog::load(hypervisor, vm_id).await?;
    info!(vm_id = %vm_id, count = catalog.len(), "Deleting all reserved snapshots");

    let mut report = AdminReport::default();
    // Newest first
    for snapshot in catalog.iter().rev() {
        match hypervisor.delete_snapshot(vm_id, &snapshot.name).await {
            Ok(()) => report.deleted.push(snapshot.name.clone()),
            Err(e) => {
                warn!(vm_id = %vm_id, snapshot = %snapshot.name, "Delete failed: {}", e);
                report.failed.push((snapshot.name.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Destroy every reserved snapshot on every local dataset, for all VMs
pub async fn purge_all(store: &dyn SnapshotStore) -> Result<AdminReport> {
    let all = store.list_all_snapshots().await?;
    let reserved: Vec<String> = all
        .into_iter()
        .filter(|full| Snapshot::parse_qualified(full).is_some())
        .collect();

    info!(count = reserved.len(), "Purging reserved snapshots from local pools");

    let mut report = AdminReport::default();
    for full in reserved {
        match store.destroy_snapshot(&full).await {
            Ok(()) => report.deleted.push(full),
            Err(e) => {
                warn!(snapshot = %full, "Purge failed: {}", e);
                report.failed.push((full, e.to_string()));
            }
        }
    }

    Ok(report)
}
