//! Implementation of the `leasepool renew` command.

use super::{Session, collect_machines, format_duration, load_previous, resolve_holder};
use crate::acquire::StoreRetry;
use crate::cli::RenewArgs;
use crate::error::{LeaseError, Result};
use crate::lease::Clock;
use crate::release::renew_machines;
use crate::report::{Event, EventAction};
use serde_json::json;
use tracing::warn;

/// Execute the `leasepool renew` command.
///
/// Fails with a lock conflict if any of the leases is no longer held.
pub fn cmd_renew(session: &Session, clock: &dyn Clock, args: RenewArgs) -> Result<()> {
    let previous = load_previous(args.from_result.as_deref())?;
    let holder = resolve_holder(&args.holder, previous.as_ref())?;
    let machines = collect_machines(&args.machines, previous.as_ref());
    if machines.is_empty() {
        return Err(LeaseError::UserError(
            "no machines to renew; name them or pass --from-result".to_string(),
        ));
    }

    let lease = session.config.lease(args.lease_minutes)?;
    let retry = StoreRetry::new(session.config.store_retry, clock);
    let report = renew_machines(&session.store, clock, &retry, &machines, &holder, lease)?;

    let event = Event::new(EventAction::Renew)
        .with_holder(&holder)
        .with_details(json!({
            "renewed": report.renewed.iter().map(|r| &r.machine_id).collect::<Vec<_>>(),
            "lost": report.lost,
            "lease_minutes": lease.duration().num_minutes(),
        }));
    if let Err(e) = session.events.append(&event) {
        warn!(error = %e, "failed to append renew event");
    }

    let now = clock.now();
    for record in &report.renewed {
        println!(
            "renewed {} (expires in {})",
            record.machine_id,
            format_duration(record.remaining(now))
        );
    }

    report.into_result().map(|_| ())
}
