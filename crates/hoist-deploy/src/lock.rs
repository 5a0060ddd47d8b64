//! Per-app deployment lock.
//!
//! The lock is a marker file in the app's base directory. Its mtime is the
//! acquisition time; a marker older than the staleness timeout belongs to an
//! abandoned deploy and is taken over. The marker is created with
//! `create_new`, so two acquirers racing past the staleness check cannot
//! both win.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{DeployError, DeployResult};

/// Marker file name inside the app base directory.
pub const LOCK_FILE: &str = ".deploying";

/// Age after which a marker is considered abandoned.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct LockManager {
    stale_after: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LOCK_STALE_AFTER)
    }
}

impl LockManager {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Take the lock for the app rooted at `base`, creating `base` if needed.
    pub fn acquire(&self, base: &Path) -> DeployResult<DeployLock> {
        fs::create_dir_all(base)?;
        let path = base.join(LOCK_FILE);

        match fs::metadata(&path) {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|at| SystemTime::now().duration_since(at).ok())
                    .unwrap_or(Duration::ZERO);
                if age <= self.stale_after {
                    return Err(DeployError::Conflict(format!(
                        "deployment already in progress (started {}s ago)",
                        age.as_secs()
                    )));
                }
                warn!(lock = %path.display(), age_secs = age.as_secs(), "removing stale deploy lock");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DeployError::Conflict(
                    "deployment already in progress".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        // Content is informational only; the mtime is what counts.
        let _ = writeln!(file, "{}", std::process::id());

        debug!(lock = %path.display(), "deploy lock acquired");
        Ok(DeployLock {
            path,
            held: true,
        })
    }
}

/// Guard for an acquired lock. Releases on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
    held: bool,
}

impl DeployLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Never fails; problems are logged.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = %self.path.display(), "deploy lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(lock = %self.path.display(), error = %e, "failed to release deploy lock"),
        }
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        self.remove();
    }
}
