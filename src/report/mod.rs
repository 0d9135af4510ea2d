//! Reporting the outcome of lock operations.
//!
//! Every acquisition and release ends in a [`LockOutcome`], which is handed
//! to each configured [`StatusReporter`]: the result files consumed by later
//! CI stages, and the store's audit log.

mod events;
mod files;


pub use events::{Event, EventAction, EventLog, append_event};
pub use files::ResultFiles;

use crate::acquire::{AcquirePhase, Acquisition};
use crate::error::{LeaseError, Result};
use crate::lease::Holder;
use crate::release::ReleaseReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn};

/// Final status of a lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Satisfied,
    PartiallyClaimed,
    TimedOut,
    Unavailable,
    Released,
}

impl OutcomeStatus {
    /// Whether the caller ended up holding machines.
    pub fn holds_machines(&self) -> bool {
        matches!(self, OutcomeStatus::Satisfied | OutcomeStatus::PartiallyClaimed)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Satisfied => write!(f, "satisfied"),
            OutcomeStatus::PartiallyClaimed => write!(f, "partially_claimed"),
            OutcomeStatus::TimedOut => write!(f, "timed_out"),
            OutcomeStatus::Unavailable => write!(f, "unavailable"),
            OutcomeStatus::Released => write!(f, "released"),
        }
    }
}

/// A machine held at the end of an acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedMachine {
    pub machine_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one acquisition or release, as written to the result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockOutcome {
    pub status: OutcomeStatus,
    pub holder: Holder,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_type: Option<String>,

    /// Requested count, as given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,

    #[serde(default)]
    pub assigned: Vec<AssignedMachine>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub released: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_held: Vec<String>,

    #[serde(default)]
    pub rounds: u32,

    pub elapsed_seconds: i64,

    /// Why nothing (or not everything) was acquired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub finished_at: DateTime<Utc>,
}

impl LockOutcome {
    /// Outcome of an acquisition that ran to completion.
    pub fn from_acquisition(
        acquisition: &Acquisition,
        holder: &Holder,
        flow_type: &str,
        requested: &str,
    ) -> Self {
        let status = match acquisition.phase {
            AcquirePhase::Satisfied => OutcomeStatus::Satisfied,
            AcquirePhase::PartiallyClaimed => OutcomeStatus::PartiallyClaimed,
            AcquirePhase::Searching | AcquirePhase::TimedOut => OutcomeStatus::TimedOut,
        };

        let claimed = acquisition.records.len();
        let reason = match status {
            OutcomeStatus::PartiallyClaimed => Some(format!(
                "deadline reached with {} of {} machines (minimum {})",
                claimed, acquisition.thresholds.target, acquisition.thresholds.minimum
            )),
            OutcomeStatus::TimedOut => Some(format!(
                "no {} machines available within the deadline ({} wanted, {} rounds)",
                flow_type, acquisition.thresholds.minimum, acquisition.rounds
            )),
            _ => None,
        };

        Self {
            status,
            holder: holder.clone(),
            flow_type: Some(flow_type.to_string()),
            requested: Some(requested.to_string()),
            assigned: acquisition
                .records
                .iter()
                .map(|r| AssignedMachine {
                    machine_id: r.machine_id.clone(),
                    expires_at: r.expires_at,
                })
                .collect(),
            released: Vec::new(),
            not_held: Vec::new(),
            rounds: acquisition.rounds,
            elapsed_seconds: (acquisition.finished_at - acquisition.started_at).num_seconds(),
            reason,
            finished_at: acquisition.finished_at,
        }
    }

    /// Outcome of an acquisition aborted by a store failure.
    pub fn unavailable(
        holder: &Holder,
        flow_type: &str,
        requested: &str,
        error: &LeaseError,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Unavailable,
            holder: holder.clone(),
            flow_type: Some(flow_type.to_string()),
            requested: Some(requested.to_string()),
            assigned: Vec::new(),
            released: Vec::new(),
            not_held: Vec::new(),
            rounds: 0,
            elapsed_seconds: (now - started_at).num_seconds(),
            reason: Some(error.to_string()),
            finished_at: now,
        }
    }

    /// Outcome of an explicit release.
    pub fn from_release(report: &ReleaseReport, holder: &Holder, now: DateTime<Utc>) -> Self {
        Self {
            status: OutcomeStatus::Released,
            holder: holder.clone(),
            flow_type: None,
            requested: None,
            assigned: Vec::new(),
            released: report.released.clone(),
            not_held: report.not_held.clone(),
            rounds: 0,
            elapsed_seconds: 0,
            reason: None,
            finished_at: now,
        }
    }

    /// Ids of the assigned machines.
    pub fn machines(&self) -> Vec<String> {
        self.assigned.iter().map(|m| m.machine_id.clone()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LeaseError::UserError(format!("failed to serialize lock outcome: {}", e)))
    }

    /// Read an outcome back from a result file written by an earlier stage.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to read result file '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to parse result file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Destination for lock outcomes.
pub trait StatusReporter {
    fn report(&self, outcome: &LockOutcome) -> Result<()>;
}

/// Log `outcome` and hand it to every reporter.
///
/// All reporters run even if one fails; the first failure is returned.
pub fn publish(reporters: &[&dyn StatusReporter], outcome: &LockOutcome) -> Result<()> {
    let machines = outcome.machines().join(",");
    match outcome.status {
        OutcomeStatus::Satisfied | OutcomeStatus::PartiallyClaimed | OutcomeStatus::Released => {
            info!(
                status = %outcome.status,
                holder = %outcome.holder,
                machines = %machines,
                released = ?outcome.released,
                elapsed_seconds = outcome.elapsed_seconds,
                "lock operation finished"
            )
        }
        OutcomeStatus::TimedOut | OutcomeStatus::Unavailable => error!(
            status = %outcome.status,
            holder = %outcome.holder,
            reason = outcome.reason.as_deref().unwrap_or(""),
            elapsed_seconds = outcome.elapsed_seconds,
            "lock operation failed"
        ),
    }

    let mut first_error = None;
    for reporter in reporters {
        if let Err(e) = reporter.report(outcome) {
            warn!(error = %e, "failed to report lock outcome");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
