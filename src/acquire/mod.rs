//! The acquisition protocol.
//!
//! An acquisition runs in rounds. Each round renews the leases already
//! claimed, asks the selector for more candidates and claims them with the
//! store's conditional write. Between rounds the loop backs off, never past
//! the deadline.
//!
//! ```text
//! Searching -> PartiallyClaimed -> Satisfied
//!          \                  \-> TimedOut
//!           \-------------------> TimedOut
//! ```
//!
//! On `TimedOut` (and on a fatal store error) every machine claimed by this
//! acquisition is released before returning.

mod backoff;
mod retry;

#[cfg(test)]
mod tests;

pub use backoff::{Backoff, MIN_DELAY, cap_to_remaining};
pub use retry::StoreRetry;

use crate::config::{Config, FulfillmentPolicy};
use crate::error::{LeaseError, Result};
use crate::lease::{Clock, Holder, Lease, LockRecord};
use crate::pool::Pool;
use crate::selector::{CountRequest, SelectionRequest, Thresholds, select_candidates};
use crate::store::{ExpectedState, LockStore};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything needed to acquire machines for one holder.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Eligible machines, already filtered by flow and server type.
    pub pool: Pool,
    pub flow_type: String,
    /// Acquire this specific machine only.
    pub machine: Option<String>,
    pub count: CountRequest,
    pub holder: Holder,
    pub lease: Lease,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub policy: FulfillmentPolicy,
}

impl AcquireRequest {
    /// Reject requests that can never be satisfied, before touching the store.
    pub fn validate(&self) -> Result<Thresholds> {
        if let Some(machine) = &self.machine {
            if !self.count.is_single() {
                return Err(LeaseError::InvalidRequest(format!(
                    "a specific machine ('{}') cannot be combined with count {}",
                    machine, self.count
                )));
            }
            if !self.pool.contains(machine) {
                return Err(LeaseError::InvalidRequest(format!(
                    "machine '{}' is not an eligible '{}' machine in the pool",
                    machine, self.flow_type
                )));
            }
            return CountRequest::Exact(1).resolve(1);
        }

        self.count.resolve(self.pool.len())
    }
}

/// Where an acquisition stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePhase {
    /// Nothing claimed yet.
    Searching,
    /// Some machines claimed, fewer than the target.
    PartiallyClaimed,
    /// Target reached (or settled at the minimum of a range).
    Satisfied,
    /// Deadline passed; nothing is held.
    TimedOut,
}

impl fmt::Display for AcquirePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquirePhase::Searching => write!(f, "searching"),
            AcquirePhase::PartiallyClaimed => write!(f, "partially_claimed"),
            AcquirePhase::Satisfied => write!(f, "satisfied"),
            AcquirePhase::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Mutable state of one acquisition.
#[derive(Debug, Clone)]
pub struct AcquireState {
    pub phase: AcquirePhase,
    pub round: u32,
    /// Records written by this acquisition, in claim order.
    pub claimed: Vec<LockRecord>,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

impl AcquireState {
    fn new(started_at: DateTime<Utc>, timeout: Option<Duration>) -> Result<Self> {
        let deadline = match timeout {
            Some(timeout) => {
                let timeout = chrono::Duration::from_std(timeout).map_err(|e| {
                    LeaseError::InvalidRequest(format!("timeout out of range: {}", e))
                })?;
                let deadline = started_at.checked_add_signed(timeout).ok_or_else(|| {
                    LeaseError::InvalidRequest(format!(
                        "timeout of {}s is too far in the future",
                        timeout.num_seconds()
                    ))
                })?;
                Some(deadline)
            }
            None => None,
        };

        Ok(Self {
            phase: AcquirePhase::Searching,
            round: 0,
            claimed: Vec::new(),
            started_at,
            deadline,
        })
    }

    fn deadline_reached(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.signed_duration_since(now).to_std().unwrap_or_default())
    }

    fn update_phase(&mut self) {
        self.phase = if self.claimed.is_empty() {
            AcquirePhase::Searching
        } else {
            AcquirePhase::PartiallyClaimed
        };
    }
}

/// Final result of an acquisition that did not fail outright.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// `Satisfied`, `PartiallyClaimed` (kept at the deadline) or `TimedOut`.
    pub phase: AcquirePhase,
    /// Records held by the caller (empty when timed out).
    pub records: Vec<LockRecord>,
    pub thresholds: Thresholds,
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Acquisition {
    pub fn machines(&self) -> Vec<String> {
        self.records.iter().map(|r| r.machine_id.clone()).collect()
    }
}

/// Drives acquisitions against a store.
pub struct Acquirer<'a> {
    store: &'a dyn LockStore,
    clock: &'a dyn Clock,
    backoff: Backoff,
    retry: StoreRetry<'a>,
}

impl<'a> Acquirer<'a> {
    pub fn new(store: &'a dyn LockStore, clock: &'a dyn Clock, config: &Config) -> Self {
        Self {
            store,
            clock,
            backoff: Backoff::new(config.backoff),
            retry: StoreRetry::new(config.store_retry, clock),
        }
    }

    /// Acquire machines until the request is satisfied or the deadline passes.
    ///
    /// A timeout is reported through [`Acquisition::phase`]; errors are
    /// invalid requests and exhausted store retries. In both failure cases
    /// nothing claimed by this call is left held.
    pub fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition> {
        let thresholds = request.validate()?;
        let mut state = AcquireState::new(self.clock.now(), request.timeout)?;
        let mut rng = rand::thread_rng();

        info!(
            holder = %request.holder,
            flow_type = %request.flow_type,
            count = %request.count,
            minimum = thresholds.minimum,
            target = thresholds.target,
            "acquiring machines"
        );

        loop {
            state.round += 1;

            if let Err(e) = self.run_round(request, &thresholds, &mut state) {
                warn!(holder = %request.holder, error = %e, "acquisition failed, releasing claims");
                self.release_claimed(&mut state, &request.holder);
                return Err(e);
            }

            if state.phase == AcquirePhase::Satisfied {
                return Ok(self.finish(state, thresholds));
            }

            let now = self.clock.now();
            if state.deadline_reached(now) {
                let keep = request.policy == FulfillmentPolicy::Partial
                    && !state.claimed.is_empty()
                    && state.claimed.len() >= thresholds.minimum;
                if keep {
                    state.phase = AcquirePhase::PartiallyClaimed;
                    info!(
                        holder = %request.holder,
                        claimed = state.claimed.len(),
                        minimum = thresholds.minimum,
                        "deadline reached, keeping partial claim"
                    );
                } else {
                    self.release_claimed(&mut state, &request.holder);
                    state.phase = AcquirePhase::TimedOut;
                    warn!(holder = %request.holder, rounds = state.round, "deadline reached, nothing acquired");
                }
                return Ok(self.finish(state, thresholds));
            }

            if request.policy == FulfillmentPolicy::AllOrNothing && !state.claimed.is_empty() {
                debug!(
                    holder = %request.holder,
                    claimed = state.claimed.len(),
                    "target not reached, releasing round claims"
                );
                self.release_claimed(&mut state, &request.holder);
                state.update_phase();
            }

            let delay = cap_to_remaining(self.backoff.delay(state.round, &mut rng), state.remaining(now));
            info!(
                holder = %request.holder,
                round = state.round,
                phase = %state.phase,
                claimed = state.claimed.len(),
                target = thresholds.target,
                wait_seconds = delay.as_secs(),
                "waiting for machines"
            );
            self.clock.sleep(delay);
        }
    }

    fn run_round(
        &self,
        request: &AcquireRequest,
        thresholds: &Thresholds,
        state: &mut AcquireState,
    ) -> Result<()> {
        self.renew_claimed(request, state)?;

        let now = self.clock.now();
        let wanted = thresholds.target.saturating_sub(state.claimed.len());
        let selection = self.retry.run("select", || {
            select_candidates(
                self.store,
                &SelectionRequest {
                    pool: &request.pool,
                    machine: request.machine.as_deref(),
                    wanted,
                    holder: &request.holder,
                    now,
                },
            )
        })?;

        debug!(
            round = state.round,
            candidates = ?selection.candidates,
            held = selection.held.len(),
            expired = ?selection.expired,
            unreadable = ?selection.unreadable,
            "selected candidates"
        );

        let exhausted = selection.candidates.len() < wanted;
        for machine_id in &selection.candidates {
            if state.claimed.len() >= thresholds.target {
                break;
            }

            let record = LockRecord::new(
                machine_id,
                &request.holder,
                &request.flow_type,
                now,
                request.lease,
            );
            let expected = ExpectedState::Available { as_of: now };
            if self
                .retry
                .run("claim", || self.store.try_claim(&record, &expected))?
            {
                info!(machine = %machine_id, holder = %request.holder, round = state.round, "machine locked");
                state.claimed.push(record);
            } else {
                debug!(machine = %machine_id, round = state.round, "lost race for machine");
            }
        }

        let claimed = state.claimed.len();
        let settled = thresholds.settle_at_minimum && exhausted && claimed >= thresholds.minimum;
        if claimed >= thresholds.target || settled {
            state.phase = AcquirePhase::Satisfied;
        } else {
            state.update_phase();
        }
        Ok(())
    }

    /// Push out the leases of machines claimed in earlier rounds.
    fn renew_claimed(&self, request: &AcquireRequest, state: &mut AcquireState) -> Result<()> {
        if state.claimed.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let expected = ExpectedState::HeldBy(request.holder.clone());
        let mut kept = Vec::with_capacity(state.claimed.len());
        for record in std::mem::take(&mut state.claimed) {
            let renewed = record.renewed(now, request.lease);
            if self
                .retry
                .run("renew", || self.store.try_claim(&renewed, &expected))?
            {
                kept.push(renewed);
            } else {
                warn!(machine = %record.machine_id, holder = %request.holder, "lost lease on claimed machine");
            }
        }
        state.claimed = kept;
        Ok(())
    }

    /// Release everything claimed so far; failures are logged, not returned.
    fn release_claimed(&self, state: &mut AcquireState, holder: &Holder) {
        let now = self.clock.now();
        for record in state.claimed.drain(..) {
            match self
                .retry
                .run("release", || self.store.release(&record.machine_id, holder, now))
            {
                Ok(_) => debug!(machine = %record.machine_id, "released claim"),
                Err(e) => warn!(
                    machine = %record.machine_id,
                    error = %e,
                    "failed to release claim; it will expire with its lease"
                ),
            }
        }
    }

    fn finish(&self, state: AcquireState, thresholds: Thresholds) -> Acquisition {
        Acquisition {
            phase: state.phase,
            records: state.claimed,
            thresholds,
            rounds: state.round,
            started_at: state.started_at,
            finished_at: self.clock.now(),
        }
    }
}
