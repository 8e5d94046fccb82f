///! Snapshot listing

use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;
use zreplica_common::Snapshot;
use zreplica_engine::{QmCli, SnapshotCatalog, ZreplicaConfig};

#[derive(Tabled, Serialize)]
struct SnapshotRow {
    name: String,
    kind: String,
    created_at: String,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(s: &Snapshot) -> Self {
        Self {
            name: s.name.clone(),
            kind: s.kind.to_string(),
            created_at: s
                .created_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

pub async fn handle_list_command(
    vm_id: &str,
    config: &ZreplicaConfig,
    format: OutputFormat,
) -> Result<()> {
    let catalog = SnapshotCatalog::load(&QmCli::new(), vm_id).await?;
    let rows: Vec<SnapshotRow> = catalog.iter().map(SnapshotRow::from).collect();
    output::print_output(rows, format)?;

    if format == OutputFormat::Table && !catalog.is_empty() {
        let policy = config.retention();
        let next = zreplica_engine::replication::decide(&catalog, &policy);
        output::print_info(&format!(
            "{} of {} kept, next snapshot will be {}",
            catalog.len(),
            policy.keep,
            next
        ));
    }

    Ok(())
}
