//! Lock record, holder identity and lease length.

use crate::error::{LeaseError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the pipeline (and optionally job) holding a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Holder {
    /// CI pipeline id.
    pub pipeline_id: String,

    /// CI job id within the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl Holder {
    /// Build a holder, rejecting empty or whitespace-bearing ids.
    pub fn new(pipeline_id: &str, job_id: Option<&str>) -> Result<Self> {
        validate_id_part("pipeline id", pipeline_id)?;
        let job_id = match job_id.map(str::trim).filter(|j| !j.is_empty()) {
            Some(job) => {
                validate_id_part("job id", job)?;
                Some(job.to_string())
            }
            None => None,
        };

        Ok(Self {
            pipeline_id: pipeline_id.trim().to_string(),
            job_id,
        })
    }
}

fn validate_id_part(what: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LeaseError::InvalidRequest(format!("{} must not be empty", what)));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(LeaseError::InvalidRequest(format!(
            "{} must not contain whitespace (got '{}')",
            what, value
        )));
    }
    Ok(())
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.job_id {
            Some(job) => write!(f, "{}_{}", self.pipeline_id, job),
            None => write!(f, "{}", self.pipeline_id),
        }
    }
}

/// A validated lease length: positive and no longer than the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease(Duration);

impl Lease {
    pub fn new(duration: Duration, max: Duration) -> Result<Self> {
        if duration <= Duration::zero() {
            return Err(LeaseError::InvalidRequest(
                "lease duration must be greater than 0".to_string(),
            ));
        }
        if duration > max {
            return Err(LeaseError::InvalidRequest(format!(
                "lease of {} minutes exceeds the maximum of {} minutes",
                duration.num_minutes(),
                max.num_minutes()
            )));
        }
        Ok(Self(duration))
    }

    pub fn from_minutes(minutes: u32, max_minutes: u32) -> Result<Self> {
        Self::new(
            Duration::minutes(minutes as i64),
            Duration::minutes(max_minutes as i64),
        )
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

/// Derived state of a machine's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// No record.
    Free,
    /// Record with a lease that has not run out.
    Held,
    /// Record whose lease ran out; selectable like `Free`.
    Expired,
}

impl RecordStatus {
    /// Whether a machine in this state may be claimed.
    pub fn is_claimable(&self) -> bool {
        !matches!(self, RecordStatus::Held)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Free => write!(f, "free"),
            RecordStatus::Held => write!(f, "held"),
            RecordStatus::Expired => write!(f, "expired"),
        }
    }
}

/// One machine's lock, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub machine_id: String,
    pub holder: Holder,
    pub flow_type: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// `user@host` of the process that wrote the record.
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Number of times the lease was extended by its holder.
    #[serde(default)]
    pub renewals: u32,
}

impl LockRecord {
    /// A fresh record for `holder`, leased from `now`.
    pub fn new(
        machine_id: &str,
        holder: &Holder,
        flow_type: &str,
        now: DateTime<Utc>,
        lease: Lease,
    ) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            holder: holder.clone(),
            flow_type: flow_type.to_string(),
            acquired_at: now,
            expires_at: now + lease.duration(),
            owner: owner_string(),
            pid: Some(std::process::id()),
            renewals: 0,
        }
    }

    /// Same claim with its lease pushed out to `now + lease`.
    pub fn renewed(&self, now: DateTime<Utc>, lease: Lease) -> Self {
        let mut next = self.clone();
        next.expires_at = now + lease.duration();
        next.renewals = self.renewals.saturating_add(1);
        next.owner = owner_string();
        next.pid = Some(std::process::id());
        next
    }

    pub fn status(&self, now: DateTime<Utc>) -> RecordStatus {
        if is_expired(self, now) {
            RecordStatus::Expired
        } else {
            RecordStatus::Held
        }
    }

    /// Time left on the lease (negative once expired).
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at.signed_duration_since(now)
    }

    /// Whether `other` is the very same claim (not just the same holder).
    pub fn same_claim(&self, other: &LockRecord) -> bool {
        self.machine_id == other.machine_id
            && self.holder == other.holder
            && self.acquired_at == other.acquired_at
            && self.expires_at == other.expires_at
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            LeaseError::UserError(format!("failed to serialize lock record: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LeaseError::CorruptRecord(e.to_string()))
    }
}

/// The lease clock: a lease is over once `now` reaches `expires_at`.
pub fn is_expired(record: &LockRecord, now: DateTime<Utc>) -> bool {
    now >= record.expires_at
}

/// Status of a machine given its (possibly absent) record.
pub fn status_of(record: Option<&LockRecord>, now: DateTime<Utc>) -> RecordStatus {
    match record {
        None => RecordStatus::Free,
        Some(r) => r.status(now),
    }
}

/// `user@host` for the current process.
pub fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
