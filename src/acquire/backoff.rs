//! Delay between acquisition rounds.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Shortest wait between rounds, unless the deadline is closer.
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Un-jittered delay after `round` (1-based), capped at the maximum.
    pub fn base_delay(&self, round: u32) -> Duration {
        let exponent = round.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.config.initial_seconds as f64 * self.config.multiplier.powi(exponent);
        let capped = seconds.min(self.config.max_seconds as f64);
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay after `round` with jitter applied, never below [`MIN_DELAY`].
    pub fn delay<R: Rng>(&self, round: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(round);
        let jitter = self.config.jitter;
        let scaled = if jitter > 0.0 {
            base.mul_f64(1.0 + rng.gen_range(-jitter..=jitter))
        } else {
            base
        };
        scaled.max(MIN_DELAY)
    }
}

/// Cap `delay` so the sleep ends no later than the deadline.
pub fn cap_to_remaining(delay: Duration, remaining: Option<Duration>) -> Duration {
    match remaining {
        Some(remaining) => delay.min(remaining),
        None => delay,
    }
}
