//! Implementation of the `leasepool status` command.
//!
//! Displays every known machine with its derived lock status. Status is
//! computed from `expires_at` against the current time, so an expired record
//! shows as `expired` even though it is still stored.

use super::{Session, format_duration};
use crate::cli::StatusArgs;
use crate::error::Result;
use crate::lease::{Clock, LockRecord, RecordStatus, status_of};
use crate::pool::Pool;
use crate::store::LockStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One line of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusRow {
    pub machine_id: String,
    pub status: RecordStatus,
    pub record: Option<LockRecord>,
}

/// Execute the `leasepool status` command.
pub fn cmd_status(session: &Session, clock: &dyn Clock, args: StatusArgs) -> Result<()> {
    let pool = args.pool.as_ref().map(Pool::load).transpose()?;
    let records = session.store.list()?;
    let now = clock.now();
    let rows = status_rows(pool.as_ref(), records, args.flow_type.as_deref(), now);

    println!("Lock Status");
    println!("===========");
    println!();

    if rows.is_empty() {
        println!("No machines locked.");
        return Ok(());
    }

    println!(
        "{:<28} {:<8} {:<24} {:>10}",
        "MACHINE", "STATUS", "HOLDER", "EXPIRES"
    );
    for row in &rows {
        let (holder, expires) = match &row.record {
            Some(record) => (
                record.holder.to_string(),
                format_duration(record.remaining(now)),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<28} {:<8} {:<24} {:>10}",
            row.machine_id, row.status, holder, expires
        );
    }

    let count = |status: RecordStatus| rows.iter().filter(|r| r.status == status).count();
    println!();
    println!(
        "{} held, {} expired, {} free",
        count(RecordStatus::Held),
        count(RecordStatus::Expired),
        count(RecordStatus::Free)
    );

    Ok(())
}

/// Pool machines (if a pool is given) and stored records, merged by machine id.
pub(crate) fn status_rows(
    pool: Option<&Pool>,
    records: Vec<LockRecord>,
    flow_type: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<StatusRow> {
    let mut by_machine: BTreeMap<String, Option<LockRecord>> = BTreeMap::new();

    if let Some(pool) = pool {
        for machine in pool.machines() {
            if flow_type.is_none_or(|f| machine.flow_type == f) {
                by_machine.insert(machine.id.clone(), None);
            }
        }
    }
    for record in records {
        if flow_type.is_none_or(|f| record.flow_type == f) {
            by_machine.insert(record.machine_id.clone(), Some(record));
        }
    }

    by_machine
        .into_iter()
        .map(|(machine_id, record)| StatusRow {
            status: status_of(record.as_ref(), now),
            machine_id,
            record,
        })
        .collect()
}
