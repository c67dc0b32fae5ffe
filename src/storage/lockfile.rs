//! Process Lock File Module
//!
//! Prevents two relay daemons from running against the same run log, which
//! would fire every slot twice and interleave rows.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// PID lock file held for the lifetime of the daemon.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".speed-relay.lock";

    /// Acquire the lock inside `dir` (created if missing).
    ///
    /// Fails if a live relay process already holds it; a lock left behind by
    /// a dead process is removed.
    pub fn acquire<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create lock directory: {:?}", dir))?;

        let lock_path = dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder(&lock_path) {
                Ok(Some(pid)) => bail!(
                    "Another speed-relay instance is already running (PID: {})\n\
                     If it is not, remove the stale lock file: {:?}",
                    pid,
                    lock_path
                ),
                Ok(None) => {
                    tracing::info!(path = ?lock_path, "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file: {:?}", lock_path))?;
        tracing::debug!(pid, path = ?lock_path, "Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID of the live relay holding `lock_path`, `None` if stale.
    fn holder(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        let pid: u32 = contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")?;

        Ok(Self::is_relay_process(pid).then_some(pid))
    }

    #[cfg(unix)]
    fn is_relay_process(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/cmdline", pid)) {
            Ok(cmdline) => cmdline.contains("speed-relay") || cmdline.contains("speed_relay"),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_relay_process(_pid: u32) -> bool {
        true
    }

    /// Release the lock (called automatically on drop).
    pub fn release(&mut self) {
        if self.owned {
            match fs::remove_file(&self.lock_path) {
                Ok(()) => tracing::debug!(path = ?self.lock_path, "Released process lock"),
                Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
