//! Lock record store.
//!
//! The store is the only state shared between pipelines. Its conditional
//! write (`try_claim`) is the single synchronization primitive: two
//! pipelines racing for a machine cannot both succeed, and the loser sees
//! `Ok(false)` rather than an error.
//!
//! # Backends
//!
//! - [`FsLockStore`]: one JSON record per machine in a shared directory.
//!   Every mutation runs under a per-machine guard file created with
//!   **create_new** semantics, so read-compare-write is atomic across
//!   processes.
//! - `MemoryLockStore` (tests only): a mutex-protected map.

mod fs;
mod guard;
#[cfg(test)]
mod memory;


pub use fs::FsLockStore;
pub use guard::{GuardMetadata, MutationGuard};
#[cfg(test)]
pub(crate) use guard::reap_abandoned;
#[cfg(test)]
pub use memory::MemoryLockStore;

use crate::error::{LeaseError, Result};
use crate::lease::{Holder, LockRecord, is_expired};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// State a conditional write expects to find before it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedState {
    /// No record, or a record whose lease ran out as of the given instant.
    Available { as_of: DateTime<Utc> },
    /// A record owned by this holder (lease renewal).
    HeldBy(Holder),
}

impl ExpectedState {
    /// Whether `current` satisfies this expectation.
    pub fn matches(&self, current: Option<&LockRecord>) -> bool {
        match self {
            ExpectedState::Available { as_of } => current.is_none_or(|r| is_expired(r, *as_of)),
            ExpectedState::HeldBy(holder) => current.is_some_and(|r| &r.holder == holder),
        }
    }
}

/// Records of several machines read in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Parsed records; machines without a record are absent.
    pub records: BTreeMap<String, LockRecord>,
    /// Machines whose record exists but does not parse.
    pub unreadable: Vec<String>,
}

/// Durable machine -> lock record mapping shared by all pipelines.
///
/// Every operation must be visible to every other process once it returns.
pub trait LockStore: Send + Sync {
    /// Read one machine's record. Transient failures are `StoreUnavailable`.
    fn read(&self, machine_id: &str) -> Result<Option<LockRecord>>;

    /// Read the records of several machines.
    ///
    /// A corrupt record does not fail the pass; the machine is listed as
    /// unreadable so the rest of the pool stays usable.
    fn read_many(&self, machine_ids: &[String]) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        for id in machine_ids {
            match self.read(id) {
                Ok(Some(record)) => {
                    snapshot.records.insert(id.clone(), record);
                }
                Ok(None) => {}
                Err(LeaseError::CorruptRecord(reason)) => {
                    warn!(machine = %id, error = %reason, "skipping unreadable lock record");
                    snapshot.unreadable.push(id.clone());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshot)
    }

    /// Write `record` only if the stored state matches `expected`.
    ///
    /// Returns `Ok(false)` when another pipeline got there first.
    fn try_claim(&self, record: &LockRecord, expected: &ExpectedState) -> Result<bool>;

    /// Remove the record if `holder` owns it.
    ///
    /// Returns `true` only when a live lease was released. A record that is
    /// absent, owned by someone else, or already expired yields `false`
    /// (the holder's own expired record is still removed).
    fn release(&self, machine_id: &str, holder: &Holder, now: DateTime<Utc>) -> Result<bool>;

    /// All records currently stored, ordered by machine id.
    fn list(&self) -> Result<Vec<LockRecord>>;

    /// Remove `record` only if it is still the stored claim.
    fn purge(&self, record: &LockRecord) -> Result<bool>;

    /// Remove a machine's record unconditionally (operator override).
    fn clear(&self, machine_id: &str) -> Result<Option<LockRecord>>;
}
