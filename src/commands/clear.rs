//! Implementation of the `leasepool clear` command.

use super::Session;
use crate::cli::ClearArgs;
use crate::error::Result;
use crate::release::clear;
use crate::report::{Event, EventAction};
use serde_json::json;
use tracing::warn;

/// Execute the `leasepool clear` command.
///
/// Removes the record even if its lease is live; the previous holder is
/// printed so it can be told.
pub fn cmd_clear(session: &Session, args: ClearArgs) -> Result<()> {
    let previous = clear(&session.store, &args.machine, args.force)?;

    let mut event = Event::new(EventAction::Clear).with_details(json!({
        "machine": args.machine,
        "force": args.force,
        "had_record": previous.is_some(),
    }));
    if let Some(record) = &previous {
        event = event.with_holder(&record.holder);
        event.details["expires_at"] = json!(record.expires_at);
    }
    if let Err(e) = session.events.append(&event) {
        warn!(error = %e, "failed to append clear event");
    }

    match previous {
        Some(record) => println!(
            "Cleared lock on {} (was held by {})",
            args.machine, record.holder
        ),
        None => println!("No lock record for {}", args.machine),
    }
    Ok(())
}
