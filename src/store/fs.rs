//! Filesystem-backed lock store.

use super::guard::MutationGuard;
use super::{ExpectedState, LockStore};
use crate::context::StoreContext;
use crate::error::{LeaseError, Result};
use crate::fs::atomic_write_file;
use crate::lease::{Holder, LockRecord, is_expired};
use crate::pool::validate_machine_id;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Lock store keeping one JSON record per machine under `machines_locks/`.
#[derive(Debug, Clone)]
pub struct FsLockStore {
    ctx: StoreContext,
    guard_stale: Duration,
}

impl FsLockStore {
    /// Open (and lay out, if needed) the store described by `ctx`.
    pub fn open(ctx: StoreContext, guard_stale: Duration) -> Result<Self> {
        for dir in [&ctx.locks_dir, &ctx.guards_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                LeaseError::StoreUnavailable(format!(
                    "failed to create store directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self { ctx, guard_stale })
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    fn read_record(&self, machine_id: &str) -> Result<Option<LockRecord>> {
        match read_optional(&self.ctx.record_path(machine_id))? {
            Some(content) => LockRecord::from_json(&content).map(Some),
            None => Ok(None),
        }
    }

    fn remove_record(&self, machine_id: &str) -> Result<()> {
        let path = self.ctx.record_path(machine_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LeaseError::StoreUnavailable(format!(
                "failed to remove lock record '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Run `f` under the machine's guard; `Ok(None)` if the guard is busy.
    fn with_guard<T>(
        &self,
        machine_id: &str,
        action: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        validate_machine_id(machine_id)?;

        let guard = MutationGuard::acquire(&self.ctx.guard_path(machine_id), action, self.guard_stale)?;
        match guard {
            Some(_guard) => f().map(Some),
            None => Ok(None),
        }
    }
}

impl LockStore for FsLockStore {
    fn read(&self, machine_id: &str) -> Result<Option<LockRecord>> {
        validate_machine_id(machine_id)?;
        self.read_record(machine_id)
    }

    fn try_claim(&self, record: &LockRecord, expected: &ExpectedState) -> Result<bool> {
        let machine_id = record.machine_id.as_str();
        let claimed = self.with_guard(machine_id, "claim", || {
            let current = self.read_record(machine_id)?;
            if !expected.matches(current.as_ref()) {
                return Ok(false);
            }

            let json = record.to_json()?;
            atomic_write_file(self.ctx.record_path(machine_id), &json)
                .map_err(|e| LeaseError::StoreUnavailable(e.to_string()))?;
            Ok(true)
        })?;

        if claimed.is_none() {
            debug!(machine = machine_id, "claim contended on guard");
        }
        Ok(claimed.unwrap_or(false))
    }

    fn release(&self, machine_id: &str, holder: &Holder, now: DateTime<Utc>) -> Result<bool> {
        let released = self.with_guard(machine_id, "release", || {
            match self.read_record(machine_id)? {
                Some(current) if &current.holder == holder => {
                    self.remove_record(machine_id)?;
                    Ok(!is_expired(&current, now))
                }
                _ => Ok(false),
            }
        })?;

        // Release runs from cleanup stages; a busy guard is worth a retry.
        released.ok_or_else(|| {
            LeaseError::StoreUnavailable(format!(
                "machine '{}' is being modified by another process",
                machine_id
            ))
        })
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        let entries = match fs::read_dir(&self.ctx.locks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LeaseError::StoreUnavailable(format!(
                    "failed to read locks directory '{}': {}",
                    self.ctx.locks_dir.display(),
                    e
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                LeaseError::StoreUnavailable(format!("failed to read locks directory entry: {}", e))
            })?;
            let path = entry.path();

            // Skip guards, temp files and anything else that is not a record
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }

            let Some(content) = read_optional(&path)? else {
                continue;
            };
            match LockRecord::from_json(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable lock record"),
            }
        }

        records.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        Ok(records)
    }

    fn purge(&self, record: &LockRecord) -> Result<bool> {
        let machine_id = record.machine_id.as_str();
        let purged = self.with_guard(machine_id, "purge", || {
            match self.read_record(machine_id)? {
                Some(current) if current.same_claim(record) => {
                    self.remove_record(machine_id)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        Ok(purged.unwrap_or(false))
    }

    fn clear(&self, machine_id: &str) -> Result<Option<LockRecord>> {
        let cleared = self.with_guard(machine_id, "clear", || {
            // A corrupt record is exactly what an operator may need to clear.
            let previous = match self.read_record(machine_id) {
                Ok(previous) => previous,
                Err(e) => {
                    warn!(machine = machine_id, error = %e, "clearing unreadable lock record");
                    None
                }
            };
            self.remove_record(machine_id)?;
            Ok(previous)
        })?;

        cleared.ok_or_else(|| {
            LeaseError::StoreUnavailable(format!(
                "machine '{}' is being modified by another process",
                machine_id
            ))
        })
    }
}

/// Read a file, mapping "missing" to `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LeaseError::StoreUnavailable(format!(
            "failed to read lock record '{}': {}",
            path.display(),
            e
        ))),
    }
}
