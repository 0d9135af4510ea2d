//! CLI argument parsing for leasepool.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Leasepool: lease-based locks on a shared pool of CI machines.
///
/// Pipelines claim machines by writing lock records into a shared store
/// directory. Every claim carries a lease, so a pipeline that dies without
/// releasing only blocks its machines until the lease runs out.
#[derive(Parser, Debug)]
#[command(name = "leasepool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Lock store directory shared by all pipelines.
    #[arg(long, global = true, env = "LEASEPOOL_STORE")]
    pub store: Option<PathBuf>,

    /// Config file (defaults to `<store>/config.yaml` when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands for leasepool.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Acquire machines from the pool.
    ///
    /// Retries with backoff until the requested count is claimed or the
    /// timeout expires. On timeout nothing is left locked.
    Acquire(AcquireArgs),

    /// Release machines held by this pipeline.
    ///
    /// Safe to run more than once; machines not held are reported and skipped.
    Release(ReleaseArgs),

    /// Extend the leases of machines held by this pipeline.
    Renew(RenewArgs),

    /// Show the lock status of every machine.
    Status(StatusArgs),

    /// Report (and optionally purge) records whose lease ran out long ago.
    Sweep(SweepArgs),

    /// Remove a machine's lock record regardless of its holder.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(ClearArgs),
}

/// Identity of the pipeline (and job) holding locks.
#[derive(Args, Debug, Clone, Default)]
pub struct HolderArgs {
    /// CI pipeline id.
    #[arg(long, env = "CI_PIPELINE_ID")]
    pub pipeline_id: Option<String>,

    /// CI job id within the pipeline.
    #[arg(long, env = "CI_JOB_ID")]
    pub job_id: Option<String>,
}

/// Arguments for the `acquire` command.
#[derive(Args, Debug, Clone)]
pub struct AcquireArgs {
    /// Pool membership file (JSON object of machines).
    #[arg(long, alias = "cloud-servers")]
    pub pool: PathBuf,

    /// Only machines of this flow type are eligible.
    #[arg(long)]
    pub flow_type: String,

    /// Only machines of this server type are eligible.
    #[arg(long)]
    pub server_type: Option<String>,

    /// Acquire this specific machine.
    #[arg(long, alias = "lock-machine-name")]
    pub machine: Option<String>,

    /// Number of machines: N, `all`, or MIN..MAX.
    #[arg(long, conflicts_with_all = ["target_condition", "minimum_condition"])]
    pub count: Option<String>,

    /// Keep searching until the claimed count meets this condition (e.g. `>=50%`).
    #[arg(long)]
    pub target_condition: Option<String>,

    /// Accept the claim at the deadline if this condition holds (defaults to the target condition).
    #[arg(long, requires = "target_condition")]
    pub minimum_condition: Option<String>,

    /// Lease length in minutes.
    #[arg(long)]
    pub lease_minutes: Option<u32>,

    /// Give up after this many seconds (0 waits indefinitely).
    #[arg(long)]
    pub timeout_seconds: Option<u64>,

    /// What to do with a partial claim: partial or all_or_nothing.
    #[arg(long)]
    pub policy: Option<String>,

    #[command(flatten)]
    pub holder: HolderArgs,

    /// Write the outcome as JSON to this file.
    #[arg(long)]
    pub result_file: Option<PathBuf>,

    /// Write the comma-separated assigned machines to this file.
    #[arg(long, alias = "response-machine")]
    pub machines_file: Option<PathBuf>,

    /// Write `true` or `false` (machines acquired) to this file.
    #[arg(long)]
    pub got_machine_file: Option<PathBuf>,
}

/// Arguments for the `release` command.
#[derive(Args, Debug, Clone)]
pub struct ReleaseArgs {
    /// Machines to release.
    #[arg(value_delimiter = ',')]
    pub machines: Vec<String>,

    /// Release the machines assigned in this result file, as the holder
    /// recorded there.
    #[arg(long)]
    pub from_result: Option<PathBuf>,

    #[command(flatten)]
    pub holder: HolderArgs,

    /// Write the outcome as JSON to this file.
    #[arg(long)]
    pub result_file: Option<PathBuf>,
}

/// Arguments for the `renew` command.
#[derive(Args, Debug, Clone)]
pub struct RenewArgs {
    /// Machines to renew.
    #[arg(value_delimiter = ',')]
    pub machines: Vec<String>,

    /// Renew the machines assigned in this result file, as the holder
    /// recorded there.
    #[arg(long)]
    pub from_result: Option<PathBuf>,

    #[command(flatten)]
    pub holder: HolderArgs,

    /// New lease length in minutes, from now.
    #[arg(long)]
    pub lease_minutes: Option<u32>,
}

/// Arguments for the `status` command.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Pool membership file; lists free machines too.
    #[arg(long)]
    pub pool: Option<PathBuf>,

    /// Only show machines of this flow type.
    #[arg(long)]
    pub flow_type: Option<String>,
}

/// Arguments for the `sweep` command.
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Minutes past expiry before a record counts as stale.
    #[arg(long)]
    pub stale_minutes: Option<u32>,

    /// Remove stale records.
    #[arg(long)]
    pub purge: bool,
}

/// Arguments for the `clear` command.
#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Machine whose lock record should be removed.
    pub machine: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}
