///! VM configuration file handling
///!
///! - Locate and read `<conf_dir>/<vm_id>.conf`
///! - Resolve the attached datasets to replicate
///! - Produce the sanitized copy pushed to the replica host

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};
use zreplica_common::{Dataset, Error, Result};

/// Disk keys carrying replicable volumes
static DISK_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(scsi|sata|virtio|efidisk|tpmstate)\d+$").unwrap()
});

/// Where VM configuration files live
#[derive(Debug, Clone)]
pub struct VmConfigSource {
    conf_dir: PathBuf,
}

impl VmConfigSource {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    pub fn path(&self, vm_id: &str) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", vm_id))
    }

    /// Read the configuration of `vm_id`; a missing file means the VM does not exist here
    pub async fn load(&self, vm_id: &str) -> Result<String> {
        let path = self.path(vm_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::VmNotFound(format!(
                "{} (no configuration at {})",
                vm_id,
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Storage id to ZFS parent dataset mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageMap {
    /// Parent dataset for storages without an explicit entry
    pub default_pool: Option<String>,
    pub pools: HashMap<String, String>,
}

impl Default for StorageMap {
    fn default() -> Self {
        Self {
            default_pool: Some("rpool/data".to_string()),
            pools: HashMap::new(),
        }
    }
}

impl StorageMap {
    pub fn pool_for(&self, storage: &str) -> Option<&str> {
        self.pools
            .get(storage)
            .map(String::as_str)
            .or(self.default_pool.as_deref())
    }
}

/// Lines of the main section, i.e. everything before the first `[section]`
fn main_section(text: &str) -> impl Iterator<Item = &str> {
    text.lines().take_while(|line| !line.trim_start().starts_with('['))
}

/// Extract the datasets to replicate, in configuration order.
/// Entries whose volume is `none`, CD-ROM media, and storages without a
/// ZFS mapping are left out.
pub fn resolve_datasets(text: &str, storage: &StorageMap) -> Vec<Dataset> {
    let mut datasets = Vec::new();

    for line in main_section(text) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if !DISK_KEY_REGEX.is_match(key) {
            continue;
        }

        let mut fields = value.trim().split(',');
        let volume_spec = fields.next().unwrap_or("").trim();
        if volume_spec.is_empty() || volume_spec == "none" {
            debug!(slot = %key, "Skipping unattached disk entry");
            continue;
        }
        if fields.any(|opt| opt.trim() == "media=cdrom") {
            debug!(slot = %key, "Skipping CD-ROM entry");
            continue;
        }

        let Some((storage_id, volume)) = volume_spec.split_once(':') else {
            warn!(slot = %key, volume = %volume_spec, "Disk is not a storage volume, skipping");
            continue;
        };
        if volume.is_empty() || volume == "none" {
            continue;
        }

        let Some(pool) = storage.pool_for(storage_id) else {
            warn!(slot = %key, storage = %storage_id, "No ZFS pool mapped for storage, skipping");
            continue;
        };

        datasets.push(Dataset::new(
            key,
            format!("{}/{}", pool.trim_end_matches('/'), volume),
        ));
    }

    datasets
}

/// Copy of the configuration that is safe to register on the replica:
/// snapshot sections and `parent:` references stripped, auto-start off.
pub fn sanitize_vm_config(text: &str) -> String {
    let mut out = String::new();

    for line in main_section(text) {
        let trimmed = line.trim_start();
        if trimmed.starts_with("parent:") {
            continue;
        }
        if trimmed.starts_with("onboot:") {
            out.push_str("onboot: 0\n");
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    // The main section is followed by a blank separator line
    while out.ends_with("\n\n") {
        out.pop();
    }

    out
}
