//! Configuration types and defaults.

use serde::{Deserialize, Serialize};

/// What happens to machines claimed in a round that did not reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    /// Keep them and keep searching for the rest; at the deadline, settle for
    /// the minimum count if it was reached.
    #[default]
    Partial,
    /// Release them and start over next round; exact count or nothing.
    AllOrNothing,
}

impl FulfillmentPolicy {
    /// Parse a policy from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "partial" => Some(Self::Partial),
            "all_or_nothing" | "all-or-nothing" | "strict" => Some(Self::AllOrNothing),
            _ => None,
        }
    }
}

/// Backoff between acquisition rounds.
///
/// Round `n` waits `initial * multiplier^(n-1)` seconds, capped at `max`,
/// then scaled by a random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_seconds: u64,
    pub max_seconds: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_seconds: 60,
            max_seconds: 300,
            multiplier: 1.0,
            jitter: 0.2,
        }
    }
}

/// Retries for store reads and writes that fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    /// Total attempts per operation, including the first.
    pub attempts: u32,
    pub interval_seconds: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_seconds: 30,
        }
    }
}

/// Longest acquisition deadline accepted from config or the command line.
pub const MAX_LOCK_TIMEOUT_SECONDS: u64 = 30 * 24 * 60 * 60;
/// Longest single wait, for backoff rounds and store retries alike.
pub const MAX_WAIT_SECONDS: u64 = 24 * 60 * 60;

// Default value functions for serde
pub(crate) fn default_lease_minutes() -> u32 {
    180
}
pub(crate) fn default_max_lease_minutes() -> u32 {
    720
}
pub(crate) fn default_lock_timeout_seconds() -> u64 {
    3600
}
pub(crate) fn default_guard_stale_seconds() -> u64 {
    60
}
pub(crate) fn default_sweep_stale_minutes() -> u32 {
    60
}
