//! Leases, lock records and the lease clock.
//!
//! A lock record is the durable claim one pipeline holds on one machine.
//! Its status is never stored: it is derived from `expires_at` against the
//! clock, so a pipeline that crashed without releasing simply stops holding
//! the machine once its lease runs out.

mod clock;
mod record;


pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::ManualClock;
pub use record::{Holder, Lease, LockRecord, RecordStatus, is_expired, owner_string, status_of};
