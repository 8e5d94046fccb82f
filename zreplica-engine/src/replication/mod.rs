//! Replication run pipeline
//!
//! catalog -> decide -> create snapshot -> transfer each dataset -> prune
//! local chain -> push sanitized VM configuration.

pub mod admin;
pub mod chain;
pub mod decider;
pub mod orchestrator;

pub use admin::{delete_all, purge_all, AdminReport};
pub use chain::{plan_prune, prune, PruneResult};
pub use decider::{decide, ModeRequest};
pub use orchestrator::{DatasetReport, FallbackReason, ReplicationOrchestrator};

use crate::remote::ReplicaTarget;
use crate::storage::SnapshotStore;
use crate::vm::{sanitize_vm_config, Hypervisor, SnapshotCatalog};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use zreplica_common::{Dataset, Outcome, Result, RetentionPolicy, Snapshot, SnapshotKind};

/// VM configuration to register on the replica after a clean run
#[derive(Debug, Clone)]
pub struct ConfigSync {
    /// Destination path on the replica host
    pub remote_path: String,
    /// Unsanitized configuration text
    pub contents: String,
}

/// Everything one run needs, passed explicitly through every stage
#[derive(Debug, Clone)]
pub struct RunContext {
    pub vm_id: String,
    pub datasets: Vec<Dataset>,
    pub retention: RetentionPolicy,
    pub requested: ModeRequest,
    /// Source of the snapshot name timestamp
    pub started_at: NaiveDateTime,
    pub config_sync: Option<ConfigSync>,
}

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub vm_id: String,
    pub kind: SnapshotKind,
    pub snapshot: String,
    /// False when a snapshot with this name already existed
    pub created: bool,
    pub datasets: Vec<DatasetReport>,
    pub pruned: PruneResult,
    pub config_pushed: bool,
    pub config_error: Option<String>,
}

impl RunReport {
    pub fn failed_datasets(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(|d| d.outcome == Outcome::Failed)
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(|d| d.fell_back())
    }

    pub fn is_success(&self) -> bool {
        self.failed_datasets().next().is_none() && self.config_error.is_none()
    }
}

/// Replication engine bound to one hypervisor, local store and replica
#[derive(Clone)]
pub struct Replicator {
    hypervisor: Arc<dyn Hypervisor>,
    store: Arc<dyn SnapshotStore>,
    target: Arc<dyn ReplicaTarget>,
}

impl Replicator {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        store: Arc<dyn SnapshotStore>,
        target: Arc<dyn ReplicaTarget>,
    ) -> Self {
        Self {
            hypervisor,
            store,
            target,
        }
    }

    /// Fresh catalog of the VM's reserved snapshots
    pub async fn catalog(&self, vm_id: &str) -> Result<SnapshotCatalog> {
        SnapshotCatalog::load(self.hypervisor.as_ref(), vm_id).await
    }

    /// Create `snapshot` unless a reserved snapshot of that name exists.
    /// Returns whether a snapshot was created.
    pub async fn ensure_snapshot(&self, vm_id: &str, snapshot: &Snapshot) -> Result<bool> {
        let catalog = self.catalog(vm_id).await?;
        if catalog.contains(&snapshot.name) {
            info!(vm_id = %vm_id, snapshot = %snapshot.name, "Snapshot already exists, not creating");
            return Ok(false);
        }

        let description = format!("zreplica {} snapshot", snapshot.kind);
        self.hypervisor
            .create_snapshot(vm_id, &snapshot.name, &description)
            .await?;
        Ok(true)
    }

    /// Run one replication cycle.
    ///
    /// Errors returned here are run-level and fatal (listing or snapshot
    /// creation failed); nothing has been pruned or pushed in that case.
    /// Per-dataset failures are reported in [`RunReport`] instead.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport> {
        let span = info_span!("run", vm_id = %ctx.vm_id);
        self.run_inner(ctx).instrument(span).await
    }

    async fn run_inner(&self, ctx: &RunContext) -> Result<RunReport> {
        let catalog = self.catalog(&ctx.vm_id).await?;
        let kind = ctx.requested.resolve(&catalog, &ctx.retention);
        let snapshot = Snapshot::new(ctx.started_at, kind);

        info!(
            snapshot = %snapshot.name,
            kind = %kind,
            requested = ?ctx.requested,
            existing = catalog.len(),
            datasets = ctx.datasets.len(),
            "Starting replication"
        );

        let created = self.ensure_snapshot(&ctx.vm_id, &snapshot).await?;

        // Datasets are processed one at a time in configuration order
        let orchestrator = ReplicationOrchestrator::new(self.store.as_ref(), self.target.as_ref());
        let mut datasets = Vec::with_capacity(ctx.datasets.len());
        for dataset in &ctx.datasets {
            let report = orchestrator
                .replicate(dataset, &snapshot, kind)
                .instrument(info_span!("dataset", dataset = %dataset.path))
                .await;
            datasets.push(report);
        }

        // Re-read so the plan sees the snapshot just created
        let catalog = match self.catalog(&ctx.vm_id).await {
            Ok(catalog) => catalog,
            Err(e) => {
                // Remotes may already hold the new snapshot
                for ds in &datasets {
                    error!(
                        dataset = %ds.dataset.path,
                        remote = %ds.remote_dataset,
                        outcome = ?ds.outcome,
                        mode = ?ds.mode,
                        "Transfer completed before run aborted"
                    );
                }
                return Err(e);
            }
        };
        let plan = plan_prune(&catalog, &snapshot.name, &ctx.retention, kind);
        let pruned = prune(self.hypervisor.as_ref(), &ctx.vm_id, &plan).await;

        let mut report = RunReport {
            vm_id: ctx.vm_id.clone(),
            kind,
            snapshot: snapshot.name.clone(),
            created,
            datasets,
            pruned,
            config_pushed: false,
            config_error: None,
        };

        let failed = report.failed_datasets().count();
        if failed > 0 {
            error!(failed, "Replication incomplete, not pushing VM configuration");
        } else if let Some(sync) = &ctx.config_sync {
            let contents = sanitize_vm_config(&sync.contents);
            match self.target.push_file(&sync.remote_path, &contents).await {
                Ok(()) => report.config_pushed = true,
                Err(e) => {
                    warn!(path = %sync.remote_path, "Failed to push VM configuration: {}", e);
                    report.config_error = Some(e.to_string());
                }
            }
        }

        info!(
            succeeded = report
                .datasets
                .iter()
                .filter(|d| d.outcome == Outcome::Succeeded)
                .count(),
            skipped = report
                .datasets
                .iter()
                .filter(|d| d.outcome == Outcome::SkippedNoLocalSnapshot)
                .count(),
            fallbacks = report.fallbacks().count(),
            failed,
            pruned = report.pruned.deleted.len(),
            "Replication finished"
        );

        Ok(report)
    }
}
