//! In-memory lock store for protocol tests.

use super::{ExpectedState, LockStore};
use crate::error::{LeaseError, Result};
use crate::lease::{Holder, LockRecord, is_expired};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Mutex-protected map with optional injected failures.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    records: Mutex<BTreeMap<String, LockRecord>>,
    successes_before_failure: AtomicU32,
    failures_left: AtomicU32,
    claim_attempts: AtomicUsize,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with `StoreUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_after(0, n);
    }

    /// Let `ok` operations through, then fail the `n` after them.
    pub fn fail_after(&self, ok: u32, n: u32) {
        self.successes_before_failure.store(ok, Ordering::SeqCst);
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of `try_claim` calls seen so far.
    pub fn claim_attempts(&self) -> usize {
        self.claim_attempts.load(Ordering::SeqCst)
    }

    /// Seed a record directly, bypassing the conditional write.
    pub fn insert(&self, record: LockRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.machine_id.clone(), record);
    }

    fn check_failure(&self) -> Result<()> {
        if self.failures_left.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        let skipped = self
            .successes_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skipped {
            return Ok(());
        }

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(LeaseError::StoreUnavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LockStore for MemoryLockStore {
    fn read(&self, machine_id: &str) -> Result<Option<LockRecord>> {
        self.check_failure()?;
        Ok(self.records.lock().unwrap().get(machine_id).cloned())
    }

    fn try_claim(&self, record: &LockRecord, expected: &ExpectedState) -> Result<bool> {
        self.check_failure()?;
        self.claim_attempts.fetch_add(1, Ordering::SeqCst);

        let mut records = self.records.lock().unwrap();
        if !expected.matches(records.get(&record.machine_id)) {
            return Ok(false);
        }
        records.insert(record.machine_id.clone(), record.clone());
        Ok(true)
    }

    fn release(&self, machine_id: &str, holder: &Holder, now: DateTime<Utc>) -> Result<bool> {
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        match records.get(machine_id) {
            Some(current) if &current.holder == holder => {
                let live = !is_expired(current, now);
                records.remove(machine_id);
                Ok(live)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        self.check_failure()?;
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    fn purge(&self, record: &LockRecord) -> Result<bool> {
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        match records.get(&record.machine_id) {
            Some(current) if current.same_claim(record) => {
                records.remove(&record.machine_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn clear(&self, machine_id: &str) -> Result<Option<LockRecord>> {
        self.check_failure()?;
        Ok(self.records.lock().unwrap().remove(machine_id))
    }
}
