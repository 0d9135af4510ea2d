//! Implementation of the `leasepool release` command.
//!
//! Usually runs from a cleanup stage that always executes, reading the
//! machines to release from the acquire stage's result file.

use super::{Session, collect_machines, load_previous, resolve_holder};
use crate::acquire::StoreRetry;
use crate::cli::ReleaseArgs;
use crate::error::Result;
use crate::lease::Clock;
use crate::release::release_machines;
use crate::report::{LockOutcome, ResultFiles, StatusReporter, publish};
use tracing::info;

/// Execute the `leasepool release` command.
pub fn cmd_release(session: &Session, clock: &dyn Clock, args: ReleaseArgs) -> Result<()> {
    let previous = load_previous(args.from_result.as_deref())?;
    let holder = resolve_holder(&args.holder, previous.as_ref())?;
    let machines = collect_machines(&args.machines, previous.as_ref());

    if machines.is_empty() {
        info!(holder = %holder, "no machines to release");
        return Ok(());
    }

    let retry = StoreRetry::new(session.config.store_retry, clock);
    let report = release_machines(&session.store, clock, &retry, &machines, &holder)?;

    let files = ResultFiles {
        result: args.result_file.clone(),
        ..Default::default()
    };
    let reporters: [&dyn StatusReporter; 2] = [&files, &session.events];
    publish(&reporters, &LockOutcome::from_release(&report, &holder, clock.now()))?;

    for machine in &report.released {
        println!("released {}", machine);
    }
    for machine in &report.not_held {
        println!("not held {}", machine);
    }
    Ok(())
}
