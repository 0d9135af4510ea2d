//! Lock store context resolution.
//!
//! Resolves the store root (from `--store` or `LEASEPOOL_STORE`) into the
//! fixed layout every command and every pipeline agrees on:
//!
//! ```text
//! <root>/config.yaml
//! <root>/machines_locks/<machine>.lock
//! <root>/machines_locks/.guards/<machine>.guard
//! <root>/events/events.ndjson
//! ```
//!
//! The root is typically a shared mount (an object-store bucket exposed as a
//! filesystem, or an NFS export) visible to every CI runner.

use crate::error::{LeaseError, Result};
use std::path::{Path, PathBuf};

/// Directory holding one lock record per machine.
pub const MACHINES_LOCKS_DIR: &str = "machines_locks";

/// Directory (under the locks dir) holding short-lived mutation guards.
pub const GUARDS_DIR: &str = ".guards";

/// Resolved paths for a lock store. All paths are absolute.
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// The store root.
    pub root: PathBuf,

    /// Absolute path to the lock records directory (`{root}/machines_locks/`).
    pub locks_dir: PathBuf,

    /// Absolute path to the guards directory (`{root}/machines_locks/.guards/`).
    pub guards_dir: PathBuf,
}

impl StoreContext {
    /// Resolve the context for a store root, relative paths against the
    /// current directory.
    pub fn resolve<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(LeaseError::UserError(
                "no lock store given.\n\n\
                 Pass --store <dir> or set LEASEPOOL_STORE."
                    .to_string(),
            ));
        }

        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| {
                    LeaseError::UserError(format!(
                        "failed to get current working directory: {}",
                        e
                    ))
                })?
                .join(root)
        };

        let locks_dir = root.join(MACHINES_LOCKS_DIR);
        let guards_dir = locks_dir.join(GUARDS_DIR);

        Ok(Self {
            root,
            locks_dir,
            guards_dir,
        })
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Get the path to the events directory.
    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    /// Get the path to the main events log file.
    pub fn events_file(&self) -> PathBuf {
        self.events_dir().join("events.ndjson")
    }

    /// Get the path to a machine's lock record.
    pub fn record_path(&self, machine_id: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", machine_id))
    }

    /// Get the path to a machine's mutation guard.
    pub fn guard_path(&self, machine_id: &str) -> PathBuf {
        self.guards_dir.join(format!("{}.guard", machine_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_absolute_root() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StoreContext::resolve(temp_dir.path()).unwrap();

        assert_eq!(ctx.root, temp_dir.path());
        assert_eq!(ctx.locks_dir, temp_dir.path().join("machines_locks"));
        assert_eq!(ctx.guards_dir, ctx.locks_dir.join(".guards"));
    }

    #[test]
    fn test_resolve_relative_root_is_absolutized() {
        let ctx = StoreContext::resolve("some/store").unwrap();
        assert!(ctx.root.is_absolute());
        assert!(ctx.root.ends_with("some/store"));
    }

    #[test]
    fn test_resolve_empty_root_fails() {
        let err = StoreContext::resolve("").unwrap_err();
        assert!(err.to_string().contains("LEASEPOOL_STORE"));
    }

    #[test]
    fn test_paths() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = StoreContext::resolve(temp_dir.path()).unwrap();

        assert_eq!(ctx.config_path(), temp_dir.path().join("config.yaml"));
        assert_eq!(
            ctx.events_file(),
            temp_dir.path().join("events").join("events.ndjson")
        );
        assert_eq!(
            ctx.record_path("qa-1"),
            temp_dir.path().join("machines_locks").join("qa-1.lock")
        );
        assert_eq!(
            ctx.guard_path("qa-1"),
            temp_dir
                .path()
                .join("machines_locks")
                .join(".guards")
                .join("qa-1.guard")
        );
    }
}
