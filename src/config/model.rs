//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for the lock manager.
///
/// Every value can be overridden per invocation from the CLI; the file only
/// supplies the pool-wide defaults CI jobs share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lease settings
    // =========================================================================
    /// Lease length granted on acquisition, in minutes.
    #[serde(default = "default_lease_minutes")]
    pub lease_minutes: u32,

    /// Upper bound on any lease, so a stuck pipeline cannot starve the pool.
    #[serde(default = "default_max_lease_minutes")]
    pub max_lease_minutes: u32,

    // =========================================================================
    // Acquisition settings
    // =========================================================================
    /// Give up acquiring after this many seconds (0 disables the timeout).
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,

    /// Whether partial claims survive an unsatisfied round.
    #[serde(default)]
    pub fulfillment_policy: FulfillmentPolicy,

    /// Delay between acquisition rounds.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Retry budget for transient store failures.
    #[serde(default)]
    pub store_retry: StoreRetryConfig,

    // =========================================================================
    // Store maintenance
    // =========================================================================
    /// Seconds after which a mutation guard is considered abandoned.
    #[serde(default = "default_guard_stale_seconds")]
    pub guard_stale_seconds: u64,

    /// Minutes an expired record may linger before `sweep` reports it.
    #[serde(default = "default_sweep_stale_minutes")]
    pub sweep_stale_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease_minutes: default_lease_minutes(),
            max_lease_minutes: default_max_lease_minutes(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            fulfillment_policy: FulfillmentPolicy::default(),
            backoff: BackoffConfig::default(),
            store_retry: StoreRetryConfig::default(),
            guard_stale_seconds: default_guard_stale_seconds(),
            sweep_stale_minutes: default_sweep_stale_minutes(),
        }
    }
}
