//! Retrying store operations that fail transiently.

use crate::config::StoreRetryConfig;
use crate::error::Result;
use crate::lease::Clock;
use std::time::Duration;
use tracing::warn;

/// Retry budget for a single store operation.
#[derive(Clone, Copy)]
pub struct StoreRetry<'a> {
    attempts: u32,
    interval: Duration,
    clock: &'a dyn Clock,
}

impl<'a> StoreRetry<'a> {
    pub fn new(config: StoreRetryConfig, clock: &'a dyn Clock) -> Self {
        Self {
            attempts: config.attempts.max(1),
            interval: Duration::from_secs(config.interval_seconds),
            clock,
        }
    }

    /// Run `op`, retrying `StoreUnavailable` until the budget is spent.
    ///
    /// Other errors are returned immediately.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        operation = what,
                        attempt,
                        attempts = self.attempts,
                        error = %e,
                        "store operation failed, retrying"
                    );
                    self.clock.sleep(self.interval);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
