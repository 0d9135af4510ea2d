//! Append-only audit log of lock operations.
//!
//! Events are stored in NDJSON format (one JSON object per line) in
//! `<store>/events/events.ndjson`, next to the lock records, so every
//! pipeline's acquisitions and releases end up in one place.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: acquire, release, renew, sweep or clear
//! - `actor`: the owner string (e.g., `user@HOST`)
//! - `holder`: pipeline/job holder, when the action has one
//! - `details`: freeform object with action-specific details

use super::{LockOutcome, OutcomeStatus, StatusReporter};
use crate::context::StoreContext;
use crate::error::{LeaseError, Result};
use crate::lease::owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Acquisition finished (any outcome)
    Acquire,
    /// Explicit release
    Release,
    /// Lease renewal
    Renew,
    /// Stale record sweep
    Sweep,
    /// Record cleared by an operator
    Clear,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Acquire => write!(f, "acquire"),
            EventAction::Release => write!(f, "release"),
            EventAction::Renew => write!(f, "renew"),
            EventAction::Sweep => write!(f, "sweep"),
            EventAction::Clear => write!(f, "clear"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    pub action: EventAction,

    /// The process owner that performed the action (e.g., `user@HOST`).
    pub actor: String,

    /// The pipeline/job the action was performed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the current timestamp and actor.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: owner_string(),
            holder: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_holder(mut self, holder: impl ToString) -> Self {
        self.holder = Some(holder.to_string());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LeaseError::UserError(format!("failed to serialize event to JSON: {}", e)))
    }
}

/// Append an event to the log at `events_file`, creating it if needed.
///
/// Each append results in one line with a trailing newline.
pub fn append_event(events_file: &Path, event: &Event) -> Result<()> {
    let json_line = event.to_ndjson_line()?;

    if let Some(events_dir) = events_file.parent()
        && !events_dir.exists()
    {
        fs::create_dir_all(events_dir).map_err(|e| {
            LeaseError::StoreUnavailable(format!(
                "failed to create events directory '{}': {}",
                events_dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(events_file)
        .map_err(|e| {
            LeaseError::StoreUnavailable(format!(
                "failed to open events file '{}': {}",
                events_file.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        LeaseError::StoreUnavailable(format!(
            "failed to write event to '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        LeaseError::StoreUnavailable(format!(
            "failed to sync events file '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    Ok(())
}

/// The store's event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(ctx: &StoreContext) -> Self {
        Self {
            path: ctx.events_file(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &Event) -> Result<()> {
        append_event(&self.path, event)
    }
}

impl StatusReporter for EventLog {
    fn report(&self, outcome: &LockOutcome) -> Result<()> {
        let action = match outcome.status {
            OutcomeStatus::Released => EventAction::Release,
            _ => EventAction::Acquire,
        };

        let mut details = json!({
            "status": outcome.status,
            "elapsed_seconds": outcome.elapsed_seconds,
        });
        if !outcome.assigned.is_empty() {
            details["machines"] = json!(outcome.machines());
        }
        if !outcome.released.is_empty() {
            details["released"] = json!(outcome.released);
        }
        if let Some(flow_type) = &outcome.flow_type {
            details["flow_type"] = json!(flow_type);
        }
        if let Some(reason) = &outcome.reason {
            details["reason"] = json!(reason);
        }

        self.append(
            &Event::new(action)
                .with_holder(&outcome.holder)
                .with_details(details),
        )
    }
}
