//! Machine pool membership.
//!
//! The pool file is the JSON object CI already keeps for its cloud test
//! servers: one entry per machine with at least `enabled` and `flow_type`.
//!
//! ```json
//! {
//!   "__comment__": "shared CI machines",
//!   "qa2-test-0001": { "enabled": true, "flow_type": "nightly", "server_type": "XSIAM" },
//!   "qa2-test-0002": { "enabled": false, "flow_type": "nightly" }
//! }
//! ```
//!
//! Disabled entries and the `__comment__` key are not part of the pool.
//! Unknown per-machine fields are ignored.

mod machine;

#[cfg(test)]
mod tests;

pub use machine::{Machine, MachineSpec, validate_machine_id};

use crate::error::{LeaseError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Key reserved for free-form commentary in the pool file.
pub const COMMENT_FIELD_NAME: &str = "__comment__";

/// A set of machines keyed by id, in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    machines: BTreeMap<String, Machine>,
}

impl Pool {
    /// Load a pool file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to read pool file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content).map_err(|e| match e {
            LeaseError::InvalidRequest(msg) => {
                LeaseError::InvalidRequest(format!("{} (in '{}')", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse pool membership from the JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json)
            .map_err(|e| LeaseError::InvalidRequest(format!("malformed pool JSON: {}", e)))?;

        let entries = root.as_object().ok_or_else(|| {
            LeaseError::InvalidRequest("pool JSON must be an object of machines".to_string())
        })?;

        let mut machines = Vec::new();
        for (id, value) in entries {
            if id == COMMENT_FIELD_NAME {
                continue;
            }

            let spec: MachineSpec = serde_json::from_value(value.clone()).map_err(|e| {
                LeaseError::InvalidRequest(format!("malformed pool entry '{}': {}", id, e))
            })?;

            if spec.enabled {
                machines.push(Machine::new(id, spec.flow_type, spec.server_type)?);
            }
        }

        Self::from_machines(machines)
    }

    /// Build a pool from machines, rejecting duplicates.
    pub fn from_machines<I: IntoIterator<Item = Machine>>(machines: I) -> Result<Self> {
        let mut map = BTreeMap::new();
        for machine in machines {
            if let Some(dup) = map.insert(machine.id.clone(), machine) {
                return Err(LeaseError::InvalidRequest(format!(
                    "machine '{}' appears twice in the pool",
                    dup.id
                )));
            }
        }
        Ok(Self { machines: map })
    }

    /// Machines matching the flow type and, when given, the server type.
    pub fn filtered(&self, flow_type: &str, server_type: Option<&str>) -> Pool {
        let machines = self
            .machines
            .values()
            .filter(|m| m.flow_type == flow_type)
            .filter(|m| server_type.is_none_or(|s| m.server_type.as_deref() == Some(s)))
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
        Pool { machines }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.machines.contains_key(id)
    }

    /// Machines in lexicographic id order.
    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.machines.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
