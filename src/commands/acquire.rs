//! Implementation of the `leasepool acquire` command.
//!
//! Loads the pool, resolves the request against config defaults and runs the
//! acquisition loop. Whatever the outcome (satisfied, partial, timed out, or
//! store unavailable), it is written to the result files and the event log
//! before the command returns.

use super::{Session, resolve_holder};
use crate::acquire::{AcquirePhase, AcquireRequest, Acquirer};
use crate::cli::AcquireArgs;
use crate::config::{FulfillmentPolicy, MAX_LOCK_TIMEOUT_SECONDS};
use crate::error::{LeaseError, Result};
use crate::lease::Clock;
use crate::pool::Pool;
use crate::report::{LockOutcome, ResultFiles, StatusReporter, publish};
use crate::selector::{CountCondition, CountRequest};
use std::time::Duration;
use tracing::info;

/// Execute the `leasepool acquire` command.
///
/// Prints the comma-separated assigned machines to stdout on success.
pub fn cmd_acquire(session: &Session, clock: &dyn Clock, args: AcquireArgs) -> Result<()> {
    let request = build_request(session, &args)?;
    let requested = match &request.machine {
        Some(machine) => machine.clone(),
        None => request.count.to_string(),
    };

    info!(
        flow_type = %request.flow_type,
        eligible = request.pool.len(),
        machines = %request.pool.ids().join(","),
        "eligible machines"
    );
    match request.timeout {
        Some(timeout) => info!(timeout_seconds = timeout.as_secs(), "lock timeout"),
        None => info!("lock timeout is disabled"),
    }

    let files = ResultFiles {
        result: args.result_file.clone(),
        machines: args.machines_file.clone(),
        got_machine: args.got_machine_file.clone(),
    };
    let reporters: [&dyn StatusReporter; 2] = [&files, &session.events];

    let acquirer = Acquirer::new(&session.store, clock, &session.config);
    let started_at = clock.now();

    let acquisition = match acquirer.acquire(&request) {
        Ok(acquisition) => acquisition,
        Err(e @ (LeaseError::StoreUnavailable(_) | LeaseError::CorruptRecord(_))) => {
            let outcome = LockOutcome::unavailable(
                &request.holder,
                &request.flow_type,
                &requested,
                &e,
                started_at,
                clock.now(),
            );
            // The store error is what the caller needs to see.
            let _ = publish(&reporters, &outcome);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let outcome =
        LockOutcome::from_acquisition(&acquisition, &request.holder, &request.flow_type, &requested);
    let reported = publish(&reporters, &outcome);

    if acquisition.phase == AcquirePhase::TimedOut {
        return Err(LeaseError::Timeout(
            outcome
                .reason
                .unwrap_or_else(|| "no machines acquired".to_string()),
        ));
    }

    reported?;
    println!("{}", outcome.machines().join(","));
    Ok(())
}

/// Merge CLI flags with config defaults into an acquisition request.
fn build_request(session: &Session, args: &AcquireArgs) -> Result<AcquireRequest> {
    let pool = Pool::load(&args.pool)?.filtered(&args.flow_type, args.server_type.as_deref());
    if pool.is_empty() {
        return Err(LeaseError::InvalidRequest(format!(
            "no enabled machines found for flow type '{}'{}",
            args.flow_type,
            args.server_type
                .as_deref()
                .map(|s| format!(" and server type '{}'", s))
                .unwrap_or_default()
        )));
    }

    let policy = match &args.policy {
        Some(policy) => FulfillmentPolicy::from_str(policy).ok_or_else(|| {
            LeaseError::UserError(format!(
                "invalid policy '{}' (expected partial or all_or_nothing)",
                policy
            ))
        })?,
        None => session.config.fulfillment_policy,
    };

    let timeout = match args.timeout_seconds {
        Some(0) => None,
        Some(seconds) if seconds > MAX_LOCK_TIMEOUT_SECONDS => {
            return Err(LeaseError::UserError(format!(
                "--timeout-seconds must be at most {}",
                MAX_LOCK_TIMEOUT_SECONDS
            )));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => session.config.lock_timeout(),
    };

    let holder = resolve_holder(&args.holder, None)?;

    Ok(AcquireRequest {
        pool,
        flow_type: args.flow_type.clone(),
        machine: args.machine.clone(),
        count: count_request(args)?,
        holder,
        lease: session.config.lease(args.lease_minutes)?,
        timeout,
        policy,
    })
}

fn count_request(args: &AcquireArgs) -> Result<CountRequest> {
    if let Some(target) = &args.target_condition {
        let target: CountCondition = target.parse()?;
        let minimum = match &args.minimum_condition {
            Some(minimum) => minimum.parse()?,
            None => target,
        };
        return Ok(CountRequest::Conditions { target, minimum });
    }

    match &args.count {
        Some(count) => count.parse(),
        None => Ok(CountRequest::default()),
    }
}
