//! RAII mutation guard for a single machine's record.
//!
//! A guard file is created with **create_new** semantics before any
//! read-compare-write on a record and deleted when the guard is dropped.
//! Only one process can hold it at a time; a process that finds it held
//! treats that as contention. Guards left behind by a crashed process are
//! removed once older than the configured staleness threshold, by one
//! reaper at a time.

use crate::error::{LeaseError, Result};
use crate::lease::owner_string;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata written into a guard file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardMetadata {
    /// Owner of the guard (e.g., `user@HOST`).
    pub owner: String,

    /// Process ID of the guard holder (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Timestamp when the guard was created (RFC3339).
    pub created_at: DateTime<Utc>,

    /// The mutation being performed (claim/release/purge/clear).
    pub action: String,
}

impl GuardMetadata {
    /// Create new guard metadata with the current timestamp.
    pub fn new(action: &str) -> Self {
        Self {
            owner: owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
            action: action.to_string(),
        }
    }

    /// Parse guard metadata from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            LeaseError::StoreUnavailable(format!(
                "failed to read guard file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            LeaseError::StoreUnavailable(format!(
                "failed to parse guard file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Calculate the age of the guard.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Check if the guard outlived the given threshold.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}

/// RAII guard for a guard file.
///
/// When dropped, the guard file is deleted. If deletion fails, a warning is
/// logged but no panic occurs.
#[derive(Debug)]
pub struct MutationGuard {
    path: PathBuf,
}

impl MutationGuard {
    /// Try to take the guard at `path`.
    ///
    /// Returns `Ok(None)` when another live process holds it.
    pub fn acquire(path: &Path, action: &str, stale_after: Duration) -> Result<Option<Self>> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                LeaseError::StoreUnavailable(format!(
                    "failed to create guards directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // Second attempt only happens after reaping an abandoned guard.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let json = serde_json::to_string(&GuardMetadata::new(action)).map_err(|e| {
                        LeaseError::StoreUnavailable(format!(
                            "failed to serialize guard metadata: {}",
                            e
                        ))
                    })?;

                    if let Err(e) = file.write_all(json.as_bytes()).and_then(|_| file.sync_all()) {
                        let _ = fs::remove_file(path);
                        return Err(LeaseError::StoreUnavailable(format!(
                            "failed to write guard '{}': {}",
                            path.display(),
                            e
                        )));
                    }

                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !is_abandoned(path, stale_after) {
                        debug!(guard = %path.display(), "guard held by another process");
                        return Ok(None);
                    }

                    if !reap_abandoned(path, stale_after)? {
                        debug!(guard = %path.display(), "abandoned guard reaped elsewhere");
                    }
                }
                Err(e) => {
                    return Err(LeaseError::StoreUnavailable(format!(
                        "failed to create guard '{}': {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        Ok(None)
    }
}

/// Remove the guard at `path` if it is abandoned; returns whether it was.
///
/// Reapers are serialized by a sibling `.reap` file and judge the guard again
/// once they hold it, so a guard created after an abandoned one was seen is
/// never removed.
pub(crate) fn reap_abandoned(path: &Path, stale_after: Duration) -> Result<bool> {
    let reap_path = path.with_extension("reap");
    match OpenOptions::new().write(true).create_new(true).open(&reap_path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // Left behind by a reaper that crashed
            if is_abandoned(&reap_path, stale_after) {
                let _ = fs::remove_file(&reap_path);
            }
            return Ok(false);
        }
        Err(e) => {
            return Err(LeaseError::StoreUnavailable(format!(
                "failed to create reap lock '{}': {}",
                reap_path.display(),
                e
            )));
        }
    }
    let _reaping = MutationGuard { path: reap_path };

    if !is_abandoned(path, stale_after) {
        return Ok(false);
    }

    match fs::remove_file(path) {
        Ok(()) => {
            warn!(guard = %path.display(), "removed abandoned guard");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LeaseError::StoreUnavailable(format!(
            "failed to remove abandoned guard '{}': {}",
            path.display(),
            e
        ))),
    }
}

/// A guard is abandoned when its metadata (or, if unreadable mid-write, its
/// mtime) is older than the threshold.
fn is_abandoned(path: &Path, stale_after: Duration) -> bool {
    match GuardMetadata::from_file(path) {
        Ok(meta) => meta.is_stale(stale_after),
        Err(_) => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .and_then(|elapsed| Duration::from_std(elapsed).ok())
            .is_some_and(|age| age > stale_after),
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(guard = %self.path.display(), error = %e, "failed to release guard");
        }
    }
}
