//! A single pool machine.

use crate::error::{LeaseError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Machine ids become file names in the lock store.
static MACHINE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("Invalid machine id regex")
});

/// A pool entry as written in the pool file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub flow_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// An enabled machine in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub id: String,
    pub flow_type: String,
    pub server_type: Option<String>,
}

impl Machine {
    pub fn new(id: &str, flow_type: String, server_type: Option<String>) -> Result<Self> {
        validate_machine_id(id)?;
        if flow_type.trim().is_empty() {
            return Err(LeaseError::InvalidRequest(format!(
                "machine '{}' has an empty flow_type",
                id
            )));
        }

        Ok(Self {
            id: id.to_string(),
            flow_type,
            server_type,
        })
    }
}

/// Reject ids that are not safe to use as a lock file name.
pub fn validate_machine_id(id: &str) -> Result<()> {
    if MACHINE_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(LeaseError::InvalidRequest(format!(
            "invalid machine id '{}': expected letters, digits, '.', '_' or '-'",
            id
        )))
    }
}
