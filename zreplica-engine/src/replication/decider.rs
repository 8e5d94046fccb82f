//! Full vs. incremental decision
//!
//! The incremental chain after the most recent full snapshot is capped at the
//! retention count; once it reaches that depth the next snapshot is full.

use crate::vm::SnapshotCatalog;
use serde::{Deserialize, Serialize};
use zreplica_common::{RetentionPolicy, SnapshotKind};

/// Mode requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeRequest {
    /// Let the catalog decide
    #[default]
    Auto,
    Full,
    Incremental,
}

impl ModeRequest {
    /// Forced modes are taken as given; `Auto` defers to [`decide`]
    pub fn resolve(self, catalog: &SnapshotCatalog, policy: &RetentionPolicy) -> SnapshotKind {
        match self {
            ModeRequest::Auto => decide(catalog, policy),
            ModeRequest::Full => SnapshotKind::Full,
            ModeRequest::Incremental => SnapshotKind::Incremental,
        }
    }
}

/// Kind of the next snapshot to create
pub fn decide(catalog: &SnapshotCatalog, policy: &RetentionPolicy) -> SnapshotKind {
    let Some(last_full) = catalog.last_full() else {
        return SnapshotKind::Full;
    };

    let incrementals = catalog.incrementals_since(&last_full.timestamp);
    if incrementals < policy.keep as usize {
        SnapshotKind::Incremental
    } else {
        SnapshotKind::Full
    }
}
