//! Per-dataset transfer orchestration
//!
//! Each dataset walks a small state machine:
//!
//! ```text
//! Planned -> IncrementalAttempted -> Succeeded
//!                  |  (failed)
//!                  v
//! Planned -> FullAttempted -> Succeeded | Failed
//! ```
//!
//! The fallback from a failed incremental to a full transfer happens at most
//! once; a failed full transfer is final for this run. Local snapshots are
//! only read here.

use crate::remote::ReplicaTarget;
use crate::storage::{SendSpec, SnapshotStore};
use serde::Serialize;
use tracing::{error, info, warn};
use zreplica_common::{Dataset, Error, Outcome, Snapshot, SnapshotKind, TransferMode};

/// Why a dataset planned as incremental was sent in full
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum FallbackReason {
    /// No older reserved snapshot on this dataset to diff against
    NoBaseSnapshot,
    /// The incremental stream was not accepted
    IncrementalFailed(String),
}

/// Per-dataset progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Planned,
    IncrementalAttempted,
    FullAttempted,
    Succeeded,
    Failed,
}

/// Transient unit of work for one dataset in one run
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationJob {
    pub dataset: Dataset,
    pub remote_dataset: String,
    pub target: Snapshot,
    pub base: Option<Snapshot>,
    pub planned: SnapshotKind,
    pub mode: TransferMode,
    pub state: JobState,
    pub fallback: Option<FallbackReason>,
    pub error: Option<String>,
}

impl ReplicationJob {
    fn new(dataset: &Dataset, remote_dataset: String, target: &Snapshot, planned: SnapshotKind) -> Self {
        Self {
            dataset: dataset.clone(),
            remote_dataset,
            target: target.clone(),
            base: None,
            planned,
            mode: match planned {
                SnapshotKind::Full => TransferMode::Full,
                SnapshotKind::Incremental => TransferMode::Incremental,
            },
            state: JobState::Planned,
            fallback: None,
            error: None,
        }
    }

    fn fall_back(&mut self, reason: FallbackReason) {
        self.mode = TransferMode::IncrementalFallbackToFull;
        self.fallback = Some(reason);
    }
}

/// What happened to one dataset, as reported to the operator
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset: Dataset,
    pub remote_dataset: String,
    pub outcome: Outcome,
    pub mode: TransferMode,
    pub base: Option<String>,
    pub fallback: Option<FallbackReason>,
    pub error: Option<String>,
}

impl DatasetReport {
    fn skipped(dataset: &Dataset, remote_dataset: String, planned: SnapshotKind) -> Self {
        Self {
            dataset: dataset.clone(),
            remote_dataset,
            outcome: Outcome::SkippedNoLocalSnapshot,
            mode: match planned {
                SnapshotKind::Full => TransferMode::Full,
                SnapshotKind::Incremental => TransferMode::Incremental,
            },
            base: None,
            fallback: None,
            error: None,
        }
    }

    pub fn fell_back(&self) -> bool {
        self.mode == TransferMode::IncrementalFallbackToFull
    }
}

impl From<ReplicationJob> for DatasetReport {
    fn from(job: ReplicationJob) -> Self {
        Self {
            outcome: match job.state {
                JobState::Succeeded => Outcome::Succeeded,
                _ => Outcome::Failed,
            },
            dataset: job.dataset,
            remote_dataset: job.remote_dataset,
            mode: job.mode,
            base: job.base.map(|b| b.name),
            fallback: job.fallback,
            error: job.error,
        }
    }
}

/// Drives send/receive for the datasets of one VM against one replica
pub struct ReplicationOrchestrator<'a> {
    store: &'a dyn SnapshotStore,
    target: &'a dyn ReplicaTarget,
}

impl<'a> ReplicationOrchestrator<'a> {
    pub fn new(store: &'a dyn SnapshotStore, target: &'a dyn ReplicaTarget) -> Self {
        Self { store, target }
    }

    /// Replicate `target` of `dataset`. Never returns an error: every failure
    /// is confined to this dataset and carried in the report.
    pub async fn replicate(
        &self,
        dataset: &Dataset,
        target: &Snapshot,
        kind: SnapshotKind,
    ) -> DatasetReport {
        let remote_dataset = self.target.remote_dataset(dataset);

        let local = match self.local_snapshots(dataset).await {
            Ok(local) => local,
            Err(e) => {
                warn!(
                    dataset = %dataset.path,
                    "No snapshot state on local storage ({}), skipping dataset", e
                );
                return DatasetReport::skipped(dataset, remote_dataset, kind);
            }
        };

        if !local.iter().any(|s| s.name == target.name) {
            warn!(
                dataset = %dataset.path,
                snapshot = %target.name,
                "Snapshot not present on dataset, skipping"
            );
            return DatasetReport::skipped(dataset, remote_dataset, kind);
        }

        let mut job = ReplicationJob::new(dataset, remote_dataset, target, kind);

        if kind == SnapshotKind::Incremental {
            job.base = local.into_iter().filter(|s| s < target).max();

            match job.base.clone() {
                None => {
                    info!(
                        dataset = %dataset.path,
                        "No base snapshot to diff against, sending full stream"
                    );
                    job.fall_back(FallbackReason::NoBaseSnapshot);
                }
                Some(base) => {
                    self.attempt_incremental(&mut job, &base).await;
                    if job.state == JobState::Succeeded {
                        return job.into();
                    }
                }
            }
        }

        self.attempt_full(&mut job).await;
        job.into()
    }

    /// Reserved snapshots of one dataset, oldest first
    async fn local_snapshots(&self, dataset: &Dataset) -> zreplica_common::Result<Vec<Snapshot>> {
        let mut snapshots: Vec<Snapshot> = self
            .store
            .list_snapshots(&dataset.path)
            .await?
            .iter()
            .filter_map(|full| Snapshot::parse_qualified(full))
            .filter(|(ds, _)| ds == &dataset.path)
            .map(|(_, snap)| snap)
            .collect();
        snapshots.sort();
        Ok(snapshots)
    }

    async fn attempt_incremental(&self, job: &mut ReplicationJob, base: &Snapshot) {
        job.state = JobState::IncrementalAttempted;

        let send = SendSpec::incremental(
            job.dataset.snapshot_path(&base.name),
            job.dataset.snapshot_path(&job.target.name),
        );

        info!(
            dataset = %job.dataset.path,
            base = %base.name,
            snapshot = %job.target.name,
            "Sending incremental stream"
        );

        match self.target.receive(&send, &job.remote_dataset).await {
            Ok(()) => {
                info!(dataset = %job.dataset.path, "Incremental transfer complete");
                job.state = JobState::Succeeded;
            }
            Err(e) => {
                warn!(
                    dataset = %job.dataset.path,
                    "Incremental transfer failed, falling back to full: {}", e
                );
                job.fall_back(FallbackReason::IncrementalFailed(e.to_string()));
            }
        }
    }

    async fn attempt_full(&self, job: &mut ReplicationJob) {
        job.state = JobState::FullAttempted;

        self.clear_remote(&job.remote_dataset).await;

        let send = SendSpec::full(job.dataset.snapshot_path(&job.target.name));
        info!(
            dataset = %job.dataset.path,
            snapshot = %job.target.name,
            mode = %job.mode,
            "Sending full stream"
        );

        match self.target.receive(&send, &job.remote_dataset).await {
            Ok(()) => {
                info!(dataset = %job.dataset.path, "Full transfer complete");
                job.state = JobState::Succeeded;
            }
            Err(e) => {
                let err = Error::Transfer {
                    dataset: job.dataset.path.clone(),
                    mode: job.mode,
                    message: e.to_string(),
                };
                error!(dataset = %job.dataset.path, "{}", err);
                job.error = Some(err.to_string());
                job.state = JobState::Failed;
            }
        }
    }

    /// Best-effort removal of every reserved snapshot on the remote copy
    async fn clear_remote(&self, remote_dataset: &str) {
        let remote = match self.target.list_snapshots(remote_dataset).await {
            Ok(remote) => remote,
            Err(e) => {
                info!(
                    remote = %remote_dataset,
                    "No remote snapshots to clear ({})", e
                );
                return;
            }
        };

        for full in remote {
            let Some((ds, snapshot)) = Snapshot::parse_qualified(&full) else {
                continue;
            };
            if ds != remote_dataset {
                continue;
            }
            if let Err(e) = self.target.destroy_snapshot(&full).await {
                warn!(
                    remote = %remote_dataset,
                    snapshot = %snapshot.name,
                    "Failed to destroy remote snapshot: {}", e
                );
            }
        }
    }
}
