//! Config loading, validation, and derived values.

use super::model::Config;
use super::types::{MAX_LOCK_TIMEOUT_SECONDS, MAX_WAIT_SECONDS};
use crate::error::{LeaseError, Result};
use crate::lease::Lease;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load the config at `path` if it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as a map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| LeaseError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LeaseError::UserError(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.lease_minutes == 0 {
            return Err(invalid("lease_minutes must be greater than 0"));
        }
        if self.max_lease_minutes < self.lease_minutes {
            return Err(invalid(&format!(
                "max_lease_minutes ({}) must be at least lease_minutes ({})",
                self.max_lease_minutes, self.lease_minutes
            )));
        }
        if self.lock_timeout_seconds > MAX_LOCK_TIMEOUT_SECONDS {
            return Err(invalid(&format!(
                "lock_timeout_seconds must be at most {}",
                MAX_LOCK_TIMEOUT_SECONDS
            )));
        }
        if self.backoff.initial_seconds == 0 {
            return Err(invalid("backoff.initial_seconds must be greater than 0"));
        }
        if self.backoff.max_seconds < self.backoff.initial_seconds {
            return Err(invalid("backoff.max_seconds must be at least backoff.initial_seconds"));
        }
        if self.backoff.max_seconds > MAX_WAIT_SECONDS {
            return Err(invalid(&format!(
                "backoff.max_seconds must be at most {}",
                MAX_WAIT_SECONDS
            )));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(invalid("backoff.multiplier must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(invalid("backoff.jitter must be in [0, 1)"));
        }
        if self.store_retry.attempts == 0 {
            return Err(invalid("store_retry.attempts must be greater than 0"));
        }
        if self.store_retry.interval_seconds > MAX_WAIT_SECONDS {
            return Err(invalid(&format!(
                "store_retry.interval_seconds must be at most {}",
                MAX_WAIT_SECONDS
            )));
        }
        if self.guard_stale_seconds == 0 || self.guard_stale_seconds > MAX_WAIT_SECONDS {
            return Err(invalid(&format!(
                "guard_stale_seconds must be between 1 and {}",
                MAX_WAIT_SECONDS
            )));
        }
        if self.sweep_stale_minutes == 0 {
            return Err(invalid("sweep_stale_minutes must be greater than 0"));
        }

        Ok(())
    }

    /// The acquisition deadline, or `None` when disabled.
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_seconds > 0).then(|| Duration::from_secs(self.lock_timeout_seconds))
    }

    /// A lease of `minutes` (or the configured default), bounded by the maximum.
    pub fn lease(&self, minutes: Option<u32>) -> Result<Lease> {
        Lease::from_minutes(minutes.unwrap_or(self.lease_minutes), self.max_lease_minutes)
    }

    pub fn guard_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.guard_stale_seconds as i64)
    }
}

fn invalid(msg: &str) -> LeaseError {
    LeaseError::UserError(format!("config validation failed: {}", msg))
}
