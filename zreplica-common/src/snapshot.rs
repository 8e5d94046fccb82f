//! Reserved snapshot naming
//!
//! Every snapshot this system owns is named `replicate-<YYYYMMDD>-<HHMMSS>-<kind>`
//! with `<kind>` one of `full` or `inc`. The name is the only thing used to tell
//! our snapshots apart from everything else on the host, so parsing is strict.

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

/// Prefix carried by every reserved snapshot
pub const SNAPSHOT_PREFIX: &str = "replicate-";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

static SNAPSHOT_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^replicate-(\d{8}-\d{6})-(full|inc)$").unwrap()
});

/// Kind of a reserved snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Incremental,
}

impl SnapshotKind {
    /// Suffix used in the snapshot name
    pub fn suffix(&self) -> &'static str {
        match self {
            SnapshotKind::Full => "full",
            SnapshotKind::Incremental => "inc",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "full" => Some(SnapshotKind::Full),
            "inc" => Some(SnapshotKind::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Full => write!(f, "full"),
            SnapshotKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// A reserved snapshot, identified by its name alone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    /// `YYYYMMDD-HHMMSS`, sortable as a plain string
    pub timestamp: String,
    pub kind: SnapshotKind,
}

impl Snapshot {
    /// Build the snapshot name for a run started at `at`
    pub fn new(at: NaiveDateTime, kind: SnapshotKind) -> Self {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        Self {
            name: format!("{}{}-{}", SNAPSHOT_PREFIX, timestamp, kind.suffix()),
            timestamp,
            kind,
        }
    }

    /// Parse a bare snapshot name. Returns `None` for anything not reserved.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = SNAPSHOT_NAME_REGEX.captures(name)?;
        let timestamp = caps.get(1)?.as_str();
        let kind = SnapshotKind::from_suffix(caps.get(2)?.as_str())?;

        // Reject digit runs that are not a real date, e.g. month 13
        NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            name: name.to_string(),
            timestamp: timestamp.to_string(),
            kind,
        })
    }

    /// Parse the snapshot part of a `dataset@snapshot` string
    pub fn parse_qualified(full_name: &str) -> Option<(String, Self)> {
        let (dataset, name) = full_name.split_once('@')?;
        Some((dataset.to_string(), Self::parse(name)?))
    }

    pub fn is_full(&self) -> bool {
        self.kind == SnapshotKind::Full
    }

    /// Local time encoded in the name
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

impl Ord for Snapshot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Snapshot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
