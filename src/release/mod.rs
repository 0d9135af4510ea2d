//! Releasing, renewing and cleaning up leases.
//!
//! Release is idempotent: releasing a machine that is already free, or that
//! now belongs to someone else, is reported but never fails. Sweeping only
//! looks at expired records; expiry already makes them claimable, so purging
//! them is housekeeping.


use crate::acquire::StoreRetry;
use crate::error::{LeaseError, Result};
use crate::lease::{Clock, Holder, Lease, LockRecord};
use crate::store::{ExpectedState, LockStore};
use chrono::Duration;
use tracing::{info, warn};

/// What an explicit release did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Machines whose live lease was released.
    pub released: Vec<String>,
    /// Machines not held by the caller (free, expired, or reassigned).
    pub not_held: Vec<String>,
}

/// Release `machine_ids` held by `holder`.
pub fn release_machines(
    store: &dyn LockStore,
    clock: &dyn Clock,
    retry: &StoreRetry<'_>,
    machine_ids: &[String],
    holder: &Holder,
) -> Result<ReleaseReport> {
    let mut report = ReleaseReport::default();
    for machine_id in machine_ids {
        let now = clock.now();
        if retry.run("release", || store.release(machine_id, holder, now))? {
            info!(machine = %machine_id, holder = %holder, "released lock");
            report.released.push(machine_id.clone());
        } else {
            info!(machine = %machine_id, holder = %holder, "machine was not held, nothing to release");
            report.not_held.push(machine_id.clone());
        }
    }
    Ok(report)
}

/// What a renewal did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewReport {
    /// Records with their extended leases.
    pub renewed: Vec<LockRecord>,
    /// Machines the caller no longer holds.
    pub lost: Vec<String>,
}

impl RenewReport {
    /// Fail with `LockConflict` if any lease was lost.
    pub fn into_result(self) -> Result<Self> {
        if self.lost.is_empty() {
            Ok(self)
        } else {
            Err(LeaseError::LockConflict(format!(
                "lease no longer held on: {}",
                self.lost.join(", ")
            )))
        }
    }
}

/// Extend the leases of `machine_ids` held by `holder` to `now + lease`.
///
/// An expired lease is renewed as long as nobody else has claimed the
/// machine in the meantime.
pub fn renew_machines(
    store: &dyn LockStore,
    clock: &dyn Clock,
    retry: &StoreRetry<'_>,
    machine_ids: &[String],
    holder: &Holder,
    lease: Lease,
) -> Result<RenewReport> {
    let expected = ExpectedState::HeldBy(holder.clone());
    let mut report = RenewReport::default();

    for machine_id in machine_ids {
        let current = retry.run("read", || store.read(machine_id))?;
        let Some(current) = current.filter(|r| &r.holder == holder) else {
            warn!(machine = %machine_id, holder = %holder, "cannot renew a lease that is not held");
            report.lost.push(machine_id.clone());
            continue;
        };

        let renewed = current.renewed(clock.now(), lease);
        if retry.run("renew", || store.try_claim(&renewed, &expected))? {
            info!(
                machine = %machine_id,
                holder = %holder,
                expires_at = %renewed.expires_at,
                "renewed lease"
            );
            report.renewed.push(renewed);
        } else {
            warn!(machine = %machine_id, holder = %holder, "lease was taken over during renewal");
            report.lost.push(machine_id.clone());
        }
    }

    Ok(report)
}

/// An expired record found by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRecord {
    pub record: LockRecord,
    /// Time since the lease ran out.
    pub expired_for: Duration,
    pub purged: bool,
}

/// Report (and with `purge`, remove) records expired for longer than `stale_after`.
///
/// Records expired more recently are left alone.
pub fn sweep(
    store: &dyn LockStore,
    clock: &dyn Clock,
    retry: &StoreRetry<'_>,
    stale_after: Duration,
    purge: bool,
) -> Result<Vec<StaleRecord>> {
    let now = clock.now();
    let records = retry.run("list", || store.list())?;

    let mut stale = Vec::new();
    for record in records {
        let expired_for = now.signed_duration_since(record.expires_at);
        if expired_for <= stale_after {
            continue;
        }

        warn!(
            machine = %record.machine_id,
            holder = %record.holder,
            expired_minutes = expired_for.num_minutes(),
            "stale lock record"
        );

        let purged = purge && retry.run("purge", || store.purge(&record))?;
        if purged {
            info!(machine = %record.machine_id, "purged stale lock record");
        }
        stale.push(StaleRecord {
            record,
            expired_for,
            purged,
        });
    }

    Ok(stale)
}

/// Remove a machine's record regardless of holder or expiry.
pub fn clear(store: &dyn LockStore, machine_id: &str, force: bool) -> Result<Option<LockRecord>> {
    if !force {
        return Err(LeaseError::UserError(format!(
            "refusing to clear '{}' without --force; its holder may still be using it",
            machine_id
        )));
    }

    let previous = store.clear(machine_id)?;
    match &previous {
        Some(record) => warn!(
            machine = %machine_id,
            holder = %record.holder,
            expires_at = %record.expires_at,
            "force-cleared lock record"
        ),
        None => info!(machine = %machine_id, "no lock record to clear"),
    }
    Ok(previous)
}
