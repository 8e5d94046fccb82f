///! Replication run

use crate::output::{self, OutputFormat};
use crate::RunArgs;
use anyhow::{bail, Result};
use std::sync::Arc;
use tabled::Tabled;
use tracing::{debug, warn};
use zreplica_engine::lock;
use zreplica_engine::replication::{
    ConfigSync, DatasetReport, ModeRequest, Replicator, RunContext, RunReport,
};
use zreplica_engine::vm::resolve_datasets;
use zreplica_engine::{QmCli, SshTarget, VmConfigSource, ZfsManager, ZreplicaConfig};
use zreplica_common::Outcome;

#[derive(Tabled)]
struct DatasetRow {
    slot: String,
    dataset: String,
    remote: String,
    mode: String,
    base: String,
    outcome: String,
    detail: String,
}

impl From<&DatasetReport> for DatasetRow {
    fn from(d: &DatasetReport) -> Self {
        let detail = match (&d.error, &d.fallback) {
            (Some(error), _) => output::truncate(error, 60),
            (None, Some(reason)) => format!("fallback: {:?}", reason),
            (None, None) => String::new(),
        };
        Self {
            slot: d.dataset.slot.clone(),
            dataset: d.dataset.path.clone(),
            remote: d.remote_dataset.clone(),
            mode: d.mode.to_string(),
            base: d.base.clone().unwrap_or_else(|| "-".to_string()),
            outcome: d.outcome.to_string(),
            detail,
        }
    }
}

fn requested_mode(args: &RunArgs) -> ModeRequest {
    if args.full {
        ModeRequest::Full
    } else if args.incremental {
        ModeRequest::Incremental
    } else {
        ModeRequest::Auto
    }
}

pub async fn handle_run_command(
    args: RunArgs,
    mut config: ZreplicaConfig,
    format: OutputFormat,
) -> Result<()> {
    if let Some(remote) = &args.remote {
        config.remote.host = Some(remote.clone());
    }
    if let Some(retention) = args.retention {
        config.replication.retention = retention;
    }
    if args.no_config_sync {
        config.replication.sync_config = false;
    }
    let host = config.validate_for_run()?.to_string();

    if !ZfsManager::check_zfs_available() {
        bail!("ZFS tools are not available on this host");
    }
    match ZfsManager::get_zfs_version().await {
        Ok(version) => debug!("Using {}", version),
        Err(e) => warn!("Could not determine ZFS version: {}", e),
    }

    let _lock = lock::lock_vm(&config.paths.lock_dir, &args.vm_id)?;

    let vm_config = VmConfigSource::new(&config.paths.conf_dir)
        .load(&args.vm_id)
        .await?;
    let datasets = resolve_datasets(&vm_config, &config.storage);
    if datasets.is_empty() {
        output::print_warning(&format!(
            "VM {} has no ZFS-backed disks, only the snapshot will be taken",
            args.vm_id
        ));
    }

    let target = SshTarget::new(host)
        .with_pool(config.remote.pool.clone())
        .with_ssh_options(config.remote.ssh_options.clone());

    let replicator = Replicator::new(
        Arc::new(QmCli::new()),
        Arc::new(ZfsManager::new()),
        Arc::new(target),
    );

    let config_sync = config.replication.sync_config.then(|| ConfigSync {
        remote_path: config.remote_conf_path(&args.vm_id),
        contents: vm_config,
    });

    let ctx = RunContext {
        vm_id: args.vm_id.clone(),
        datasets,
        retention: config.retention(),
        requested: requested_mode(&args),
        started_at: chrono::Local::now().naive_local(),
        config_sync,
    };

    let report = replicator.run(&ctx).await?;
    print_report(&report, format)?;

    if !report.is_success() {
        bail!("Replication of VM {} did not complete", report.vm_id);
    }
    Ok(())
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        return output::print_structured(report, format);
    }

    output::print_info(&format!(
        "VM {}: {} snapshot {}{}",
        report.vm_id,
        report.kind,
        report.snapshot,
        if report.created { "" } else { " (already existed)" }
    ));

    let rows: Vec<DatasetRow> = report.datasets.iter().map(DatasetRow::from).collect();
    output::print_table(rows);

    for name in &report.pruned.deleted {
        output::print_info(&format!("Pruned {}", name));
    }
    for (name, error) in &report.pruned.failed {
        output::print_warning(&format!("Could not prune {}: {}", name, error));
    }

    if report.config_pushed {
        output::print_success("VM configuration pushed to replica");
    } else if let Some(error) = &report.config_error {
        output::print_error(&format!("VM configuration push failed: {}", error));
    }

    let failed = report.failed_datasets().count();
    if failed == 0 {
        let skipped = report
            .datasets
            .iter()
            .filter(|d| d.outcome == Outcome::SkippedNoLocalSnapshot)
            .count();
        output::print_success(&format!(
            "Replicated {} dataset(s), {} skipped",
            report.datasets.len() - skipped,
            skipped
        ));
    } else {
        output::print_error(&format!("{} dataset(s) failed", failed));
    }

    Ok(())
}
