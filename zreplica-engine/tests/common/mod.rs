//! Common test utilities and helpers
//!
//! `FakeHost` stands in for the hypervisor, the local pool and the replica at
//! once, so a whole run can be driven in memory.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use zreplica_common::{Dataset, Error, Result, RetentionPolicy};
use zreplica_engine::replication::{ConfigSync, ModeRequest, Replicator, RunContext};
use zreplica_engine::{Hypervisor, ReplicaTarget, SendSpec, SnapshotStore};

pub const VM_ID: &str = "100";

/// Mutable world state, inspected directly by tests
#[derive(Debug, Default)]
pub struct FakeState {
    /// VM snapshot names in creation order
    pub vm_snapshots: Vec<String>,
    /// Local dataset -> snapshot names
    pub local: BTreeMap<String, Vec<String>>,
    /// Remote dataset -> snapshot names
    pub remote: BTreeMap<String, Vec<String>>,
    /// Files written on the replica
    pub pushed: BTreeMap<String, String>,
    /// Every receive attempted, in order
    pub receives: Vec<(SendSpec, String)>,
    /// Number of `create_snapshot` calls that created something
    pub creations: usize,
    /// Number of VM snapshot listings served
    pub listings: usize,

    // Failure injection
    pub listing_fails: bool,
    /// Listings fail once this many have been served
    pub fail_listing_from: Option<usize>,
    pub fail_incremental: BTreeSet<String>,
    pub fail_full: BTreeSet<String>,
    pub fail_delete: BTreeSet<String>,
    pub fail_push: bool,
    /// Attached datasets the storage engine has no state for
    pub missing: BTreeSet<String>,
}

pub struct FakeHost {
    datasets: Vec<Dataset>,
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new(paths: &[&str]) -> Arc<Self> {
        let datasets: Vec<Dataset> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| Dataset::new(format!("scsi{}", i), *p))
            .collect();

        let mut state = FakeState::default();
        for ds in &datasets {
            state.local.insert(ds.path.clone(), Vec::new());
        }

        Arc::new(Self {
            datasets,
            state: Mutex::new(state),
        })
    }

    pub fn datasets(&self) -> Vec<Dataset> {
        self.datasets.clone()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Seed an existing chain on the VM, every dataset and the replica
    pub fn seed(&self, names: &[&str]) {
        let mut state = self.state();
        for name in names {
            state.vm_snapshots.push(name.to_string());
            for ds in &self.datasets {
                state.local.entry(ds.path.clone()).or_default().push(name.to_string());
                state.remote.entry(ds.path.clone()).or_default().push(name.to_string());
            }
        }
    }

    pub fn vm_snapshots(&self) -> Vec<String> {
        self.state().vm_snapshots.clone()
    }

    pub fn remote_snapshots(&self, dataset: &str) -> Vec<String> {
        self.state().remote.get(dataset).cloned().unwrap_or_default()
    }

    pub fn receives(&self) -> Vec<(SendSpec, String)> {
        self.state().receives.clone()
    }
}

fn failure(command: &str, message: &str) -> Error {
    Error::Command {
        command: command.to_string(),
        message: message.to_string(),
    }
}

fn short_name(full: &str) -> &str {
    full.split_once('@').map(|(_, name)| name).unwrap_or(full)
}

#[async_trait]
impl Hypervisor for FakeHost {
    async fn list_snapshots(&self, _vm_id: &str) -> Result<Vec<String>> {
        let mut state = self.state();
        let served = state.listings;
        state.listings += 1;
        if state.listing_fails || state.fail_listing_from.is_some_and(|n| served >= n) {
            return Err(Error::SnapshotListing("qm listsnapshot exited with 2".to_string()));
        }

        let mut lines: Vec<String> = state
            .vm_snapshots
            .iter()
            .map(|name| format!("`-> {:<40} 2025-01-01 00:00:00     test", name))
            .collect();
        lines.push(format!("`-> {:<40} You are here!", "current"));
        Ok(lines)
    }

    async fn create_snapshot(&self, _vm_id: &str, name: &str, _description: &str) -> Result<()> {
        let mut state = self.state();
        if state.vm_snapshots.iter().any(|s| s == name) {
            return Err(failure("qm snapshot", "snapshot name already exists"));
        }

        state.vm_snapshots.push(name.to_string());
        state.creations += 1;
        for ds in &self.datasets {
            if state.missing.contains(&ds.path) {
                continue;
            }
            state.local.entry(ds.path.clone()).or_default().push(name.to_string());
        }
        Ok(())
    }

    async fn delete_snapshot(&self, _vm_id: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_delete.contains(name) {
            return Err(failure("qm delsnapshot", "snapshot is locked"));
        }
        if !state.vm_snapshots.iter().any(|s| s == name) {
            return Err(failure("qm delsnapshot", "no such snapshot"));
        }

        state.vm_snapshots.retain(|s| s != name);
        for snapshots in state.local.values_mut() {
            snapshots.retain(|s| s != name);
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FakeHost {
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let state = self.state();
        if state.missing.contains(dataset) {
            return Err(failure("zfs list", "dataset does not exist"));
        }
        Ok(state
            .local
            .get(dataset)
            .map(|names| names.iter().map(|n| format!("{}@{}", dataset, n)).collect())
            .unwrap_or_default())
    }

    async fn list_all_snapshots(&self) -> Result<Vec<String>> {
        let state = self.state();
        Ok(state
            .local
            .iter()
            .flat_map(|(ds, names)| names.iter().map(move |n| format!("{}@{}", ds, n)))
            .collect())
    }

    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()> {
        let (dataset, name) = snapshot
            .split_once('@')
            .ok_or_else(|| failure("zfs destroy", "not a snapshot"))?;

        let mut state = self.state();
        if state.fail_delete.contains(name) {
            return Err(failure("zfs destroy", "dataset is busy"));
        }
        match state.local.get_mut(dataset) {
            Some(names) => {
                names.retain(|n| n != name);
                Ok(())
            }
            None => Err(failure("zfs destroy", "dataset does not exist")),
        }
    }
}

#[async_trait]
impl ReplicaTarget for FakeHost {
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let state = self.state();
        match state.remote.get(dataset) {
            Some(names) => Ok(names.iter().map(|n| format!("{}@{}", dataset, n)).collect()),
            None => Err(failure("ssh zfs list", "dataset does not exist")),
        }
    }

    async fn destroy_snapshot(&self, snapshot: &str) -> Result<()> {
        let (dataset, name) = snapshot
            .split_once('@')
            .ok_or_else(|| failure("ssh zfs destroy", "not a snapshot"))?;

        let mut state = self.state();
        if let Some(names) = state.remote.get_mut(dataset) {
            names.retain(|n| n != name);
        }
        Ok(())
    }

    async fn receive(&self, send: &SendSpec, dataset: &str) -> Result<()> {
        let mut state = self.state();
        state.receives.push((send.clone(), dataset.to_string()));

        let target = short_name(&send.snapshot).to_string();
        let remote = state.remote.get(dataset).cloned().unwrap_or_default();

        match &send.base {
            Some(base) => {
                if state.fail_incremental.contains(dataset) {
                    return Err(failure("ssh zfs receive", "Connection reset by peer"));
                }
                if !remote.iter().any(|n| n == short_name(base)) {
                    return Err(failure("ssh zfs receive", "destination has no base snapshot"));
                }
            }
            None => {
                if state.fail_full.contains(dataset) {
                    return Err(failure("ssh zfs receive", "Connection reset by peer"));
                }
                if !remote.is_empty() {
                    return Err(failure("ssh zfs receive", "destination has snapshots"));
                }
            }
        }

        state.remote.entry(dataset.to_string()).or_default().push(target);
        Ok(())
    }

    async fn push_file(&self, path: &str, contents: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_push {
            return Err(failure("ssh cat", "Permission denied"));
        }
        state.pushed.insert(path.to_string(), contents.to_string());
        Ok(())
    }
}

pub fn replicator(host: &Arc<FakeHost>) -> Replicator {
    Replicator::new(host.clone(), host.clone(), host.clone())
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn context(host: &FakeHost, keep: u32, requested: ModeRequest, started_at: NaiveDateTime) -> RunContext {
    RunContext {
        vm_id: VM_ID.to_string(),
        datasets: host.datasets(),
        retention: RetentionPolicy::new(keep),
        requested,
        started_at,
        config_sync: None,
    }
}

pub fn with_config(mut ctx: RunContext, contents: &str) -> RunContext {
    ctx.config_sync = Some(ConfigSync {
        remote_path: format!("/etc/pve/qemu-server/{}.conf", ctx.vm_id),
        contents: contents.to_string(),
    });
    ctx
}
