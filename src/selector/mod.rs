//! Candidate selection.
//!
//! Reads the records of every eligible machine in one pass, splits them
//! into claimable (free or expired) and held, and proposes the claimable
//! ones in a deterministic order. Each holder starts at its own offset in
//! the pool so concurrent pipelines do not all race for the same machine.

pub mod count;


pub use count::{CountCondition, CountRequest, Thresholds};

use crate::error::Result;
use crate::lease::{Holder, RecordStatus, status_of};
use crate::pool::Pool;
use crate::store::LockStore;
use chrono::{DateTime, Utc};

/// Outcome of one selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Claimable machines in claim order, truncated to the number wanted.
    pub candidates: Vec<String>,
    /// Machines with a live lease.
    pub held: Vec<String>,
    /// Machines whose lease ran out (claimable).
    pub expired: Vec<String>,
    /// Machines with a corrupt record; never proposed.
    pub unreadable: Vec<String>,
}

/// Inputs of one selection pass.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    /// Eligible machines (already filtered by flow and server type).
    pub pool: &'a Pool,
    /// Restrict selection to this machine.
    pub machine: Option<&'a str>,
    /// Number of candidates wanted this round.
    pub wanted: usize,
    /// Seeds the starting offset.
    pub holder: &'a Holder,
    pub now: DateTime<Utc>,
}

/// Propose up to `wanted` claimable machines.
///
/// An empty selection means nothing is available right now; it is not an
/// error.
pub fn select_candidates(store: &dyn LockStore, req: &SelectionRequest<'_>) -> Result<Selection> {
    let ids = match req.machine {
        Some(machine) => vec![machine.to_string()],
        None => claim_order(&req.pool.ids(), req.holder),
    };
    let snapshot = store.read_many(&ids)?;

    let mut selection = Selection {
        unreadable: snapshot.unreadable,
        ..Default::default()
    };
    for id in ids {
        if selection.unreadable.contains(&id) {
            continue;
        }
        let status = status_of(snapshot.records.get(&id), req.now);
        if !status.is_claimable() {
            selection.held.push(id);
            continue;
        }
        if status == RecordStatus::Expired {
            selection.expired.push(id.clone());
        }
        selection.candidates.push(id);
    }
    selection.candidates.truncate(req.wanted);

    Ok(selection)
}

/// Pool ids in lexicographic order, rotated by the holder's offset.
pub fn claim_order(ids: &[String], holder: &Holder) -> Vec<String> {
    let mut ordered = ids.to_vec();
    ordered.sort();
    if !ordered.is_empty() {
        let offset = (stable_hash(&holder.to_string()) % ordered.len() as u64) as usize;
        ordered.rotate_left(offset);
    }
    ordered
}

/// FNV-1a; identical across runs, hosts and toolchains.
fn stable_hash(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}
