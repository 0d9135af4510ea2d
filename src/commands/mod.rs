//! Command implementations for leasepool.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, and the store session every command opens first.

mod acquire;
mod clear;
mod release;
mod renew;
mod status;
mod sweep;


use crate::cli::{Command, GlobalArgs, HolderArgs};
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::{LeaseError, Result};
use crate::lease::{Holder, SystemClock};
use crate::report::{EventLog, LockOutcome};
use crate::store::FsLockStore;
use std::path::Path;
use tracing::{debug, warn};

/// Dispatch a command to its implementation.
pub fn dispatch(global: &GlobalArgs, command: Command) -> Result<()> {
    let session = Session::open(global)?;
    let clock = SystemClock;

    match command {
        Command::Acquire(args) => acquire::cmd_acquire(&session, &clock, args),
        Command::Release(args) => release::cmd_release(&session, &clock, args),
        Command::Renew(args) => renew::cmd_renew(&session, &clock, args),
        Command::Status(args) => status::cmd_status(&session, &clock, args),
        Command::Sweep(args) => sweep::cmd_sweep(&session, &clock, args),
        Command::Clear(args) => clear::cmd_clear(&session, args),
    }
}

/// An opened lock store with its configuration.
pub struct Session {
    pub ctx: StoreContext,
    pub config: Config,
    pub store: FsLockStore,
    pub events: EventLog,
}

impl Session {
    /// Resolve the store, load and validate the config, and open the store.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let ctx = StoreContext::resolve(global.store.clone().unwrap_or_default())?;

        let config = match &global.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(ctx.config_path())?,
        };
        config.validate()?;

        let store = FsLockStore::open(ctx.clone(), config.guard_stale())?;
        let events = EventLog::new(&ctx);
        debug!(store = %ctx.root.display(), "opened lock store");

        Ok(Self {
            ctx,
            config,
            store,
            events,
        })
    }
}

/// The holder to act as.
///
/// A previous outcome's holder wins over the flags, which CI fills from the
/// job running the command rather than the job that acquired.
fn resolve_holder(args: &HolderArgs, previous: Option<&LockOutcome>) -> Result<Holder> {
    if let Some(outcome) = previous {
        if let Some(pipeline_id) = &args.pipeline_id
            && let Ok(flags) = Holder::new(pipeline_id, args.job_id.as_deref())
            && flags != outcome.holder
        {
            if flags.pipeline_id == outcome.holder.pipeline_id {
                debug!(holder = %outcome.holder, job = %flags, "acting as the holder from the result file");
            } else {
                warn!(
                    holder = %outcome.holder,
                    flags = %flags,
                    "result file belongs to another pipeline; acting as its holder"
                );
            }
        }
        return Ok(outcome.holder.clone());
    }

    match &args.pipeline_id {
        Some(pipeline_id) => Holder::new(pipeline_id, args.job_id.as_deref()),
        None => Err(LeaseError::UserError(
            "no pipeline id given.\n\n\
             Pass --pipeline-id or set CI_PIPELINE_ID."
                .to_string(),
        )),
    }
}

/// Machines named on the command line plus those assigned in a result file,
/// without duplicates.
fn collect_machines(explicit: &[String], previous: Option<&LockOutcome>) -> Vec<String> {
    let mut machines: Vec<String> = Vec::new();
    let from_result = previous.map(LockOutcome::machines).unwrap_or_default();
    for machine in explicit.iter().chain(from_result.iter()) {
        let machine = machine.trim();
        if !machine.is_empty() && !machines.iter().any(|m| m == machine) {
            machines.push(machine.to_string());
        }
    }
    machines
}

fn load_previous(path: Option<&Path>) -> Result<Option<LockOutcome>> {
    path.map(LockOutcome::load).transpose()
}

/// Format a signed duration as a short human-readable string.
fn format_duration(d: chrono::Duration) -> String {
    let minutes = d.num_minutes();
    if minutes.abs() >= 60 {
        format!("{}h{:02}m", minutes / 60, (minutes % 60).abs())
    } else if minutes != 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", d.num_seconds())
    }
}
