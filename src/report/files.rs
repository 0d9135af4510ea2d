//! Result files read by later CI stages.

use super::{LockOutcome, StatusReporter};
use crate::error::Result;
use crate::fs::atomic_write_file;
use std::path::PathBuf;

/// Writes an outcome to the files a pipeline asked for.
///
/// - `result`: the full outcome as JSON
/// - `machines`: comma-joined assigned machine ids
/// - `got_machine`: `true` or `false`
#[derive(Debug, Clone, Default)]
pub struct ResultFiles {
    pub result: Option<PathBuf>,
    pub machines: Option<PathBuf>,
    pub got_machine: Option<PathBuf>,
}

impl StatusReporter for ResultFiles {
    fn report(&self, outcome: &LockOutcome) -> Result<()> {
        if let Some(path) = &self.result {
            atomic_write_file(path, &format!("{}\n", outcome.to_json()?))?;
        }
        if let Some(path) = &self.machines {
            atomic_write_file(path, &outcome.machines().join(","))?;
        }
        if let Some(path) = &self.got_machine {
            let got = outcome.status.holds_machines() && !outcome.assigned.is_empty();
            atomic_write_file(path, if got { "true" } else { "false" })?;
        }
        Ok(())
    }
}
