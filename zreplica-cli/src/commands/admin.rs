///! Delete and purge

use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;
use zreplica_engine::lock;
use zreplica_engine::replication::{delete_all, purge_all, AdminReport};
use zreplica_engine::{QmCli, ZfsManager, ZreplicaConfig};

#[derive(Tabled, Serialize)]
struct AdminRow {
    snapshot: String,
    status: String,
}

fn rows(report: &AdminReport) -> Vec<AdminRow> {
    let deleted = report.deleted.iter().map(|name| AdminRow {
        snapshot: name.clone(),
        status: "deleted".to_string(),
    });
    let failed = report.failed.iter().map(|(name, error)| AdminRow {
        snapshot: name.clone(),
        status: format!("failed: {}", output::truncate(error, 60)),
    });
    deleted.chain(failed).collect()
}

fn finish(report: &AdminReport, what: &str, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Table {
        output::print_table(rows(report));
    } else {
        output::print_structured(report, format)?;
    }

    if !report.is_success() {
        bail!("{} snapshot(s) could not be removed", report.failed.len());
    }
    output::print_success(&format!("{}: {} snapshot(s) removed", what, report.deleted.len()));
    Ok(())
}

pub async fn handle_delete_command(
    vm_id: &str,
    config: &ZreplicaConfig,
    format: OutputFormat,
) -> Result<()> {
    let _lock = lock::lock_vm(&config.paths.lock_dir, vm_id)?;
    let report = delete_all(&QmCli::new(), vm_id).await?;
    finish(&report, &format!("VM {}", vm_id), format)
}

pub async fn handle_purge_command(
    yes: bool,
    config: &ZreplicaConfig,
    format: OutputFormat,
) -> Result<()> {
    if !yes {
        use dialoguer::Confirm;

        let confirm = Confirm::new()
            .with_prompt("Destroy every replication snapshot on all local pools?")
            .default(false)
            .interact()?;

        if !confirm {
            output::print_info("Purge cancelled");
            return Ok(());
        }
    }

    if !ZfsManager::check_zfs_available() {
        bail!("ZFS tools are not available on this host");
    }

    let _lock = lock::lock_purge(&config.paths.lock_dir)?;
    let report = purge_all(&ZfsManager::new()).await?;
    finish(&report, "Purge", format)
}
