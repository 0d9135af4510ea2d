//! Implementation of the `leasepool sweep` command.
//!
//! Expired records are already claimable; sweeping only surfaces pipelines
//! that keep dying without releasing, and optionally tidies up after them.

use super::{Session, format_duration};
use crate::acquire::StoreRetry;
use crate::cli::SweepArgs;
use crate::error::Result;
use crate::lease::Clock;
use crate::release::sweep;
use crate::report::{Event, EventAction};
use chrono::Duration;
use serde_json::json;
use tracing::warn;

/// Execute the `leasepool sweep` command.
pub fn cmd_sweep(session: &Session, clock: &dyn Clock, args: SweepArgs) -> Result<()> {
    let stale_minutes = args
        .stale_minutes
        .unwrap_or(session.config.sweep_stale_minutes);
    let retry = StoreRetry::new(session.config.store_retry, clock);
    let stale = sweep(
        &session.store,
        clock,
        &retry,
        Duration::minutes(stale_minutes as i64),
        args.purge,
    )?;

    if stale.is_empty() {
        println!("No stale lock records.");
        return Ok(());
    }

    for entry in &stale {
        println!(
            "{} held by {} expired {} ago{}",
            entry.record.machine_id,
            entry.record.holder,
            format_duration(entry.expired_for),
            if entry.purged { " [PURGED]" } else { "" }
        );
    }

    let event = Event::new(EventAction::Sweep).with_details(json!({
        "stale_minutes": stale_minutes,
        "purge": args.purge,
        "stale": stale.iter().map(|s| &s.record.machine_id).collect::<Vec<_>>(),
        "purged": stale.iter().filter(|s| s.purged).count(),
    }));
    if let Err(e) = session.events.append(&event) {
        warn!(error = %e, "failed to append sweep event");
    }

    Ok(())
}
