//! Advisory run locks (fs2).
//!
//! One exclusive lock per VM at `<lock_dir>/zreplica-<vm_id>.lock`, plus a
//! pool-wide one for purge. Acquisition never blocks: a held lock fails the
//! invocation before anything is touched. Released on Drop.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;
use zreplica_common::{Error, Result};

pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(path = %self.path.display(), "Released run lock");
    }
}

pub fn vm_lock_path(lock_dir: &Path, vm_id: &str) -> PathBuf {
    lock_dir.join(format!("zreplica-{}.lock", vm_id))
}

pub fn purge_lock_path(lock_dir: &Path) -> PathBuf {
    lock_dir.join("zreplica-purge.lock")
}

fn try_lock(path: PathBuf) -> Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    file.try_lock_exclusive()
        .map_err(|_| Error::Locked(path.display().to_string()))?;

    debug!(path = %path.display(), "Acquired run lock");
    Ok(LockGuard { file, path })
}

/// Exclusive lock for runs and deletes of one VM
pub fn lock_vm(lock_dir: &Path, vm_id: &str) -> Result<LockGuard> {
    try_lock(vm_lock_path(lock_dir, vm_id))
}

/// Exclusive lock for a pool-wide purge
pub fn lock_purge(lock_dir: &Path) -> Result<LockGuard> {
    try_lock(purge_lock_path(lock_dir))
}
