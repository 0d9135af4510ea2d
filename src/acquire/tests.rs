//! Tests for the acquisition protocol, driven by a manual clock.

use super::*;
use crate::lease::ManualClock;
use crate::selector::CountCondition;
use crate::store::{FsLockStore, MemoryLockStore};
use crate::test_support::{FLOW, create_test_store, holder, pool_of};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;

fn test_config() -> Config {
    let mut config = Config::default();
    config.store_retry.attempts = 2;
    config.store_retry.interval_seconds = 1;
    config
}

fn lease_minutes(minutes: u32) -> Lease {
    Lease::from_minutes(minutes, 720).unwrap()
}

fn request(pool: &[&str], count: CountRequest, holder: Holder, timeout_secs: u64) -> AcquireRequest {
    AcquireRequest {
        pool: pool_of(pool),
        flow_type: FLOW.to_string(),
        machine: None,
        count,
        holder,
        lease: lease_minutes(180),
        timeout: Some(Duration::from_secs(timeout_secs)),
        policy: FulfillmentPolicy::Partial,
    }
}

fn foreign_claim(store: &MemoryLockStore, clock: &ManualClock, machine: &str, lease_secs: i64) {
    let lease = Lease::new(chrono::Duration::seconds(lease_secs), chrono::Duration::hours(12)).unwrap();
    store.insert(LockRecord::new(machine, &holder("900", "1"), FLOW, clock.now(), lease));
}

fn held_by(store: &dyn LockStore, holder: &Holder) -> Vec<String> {
    store
        .list()
        .unwrap()
        .into_iter()
        .filter(|r| &r.holder == holder)
        .map(|r| r.machine_id)
        .collect()
}

#[test]
fn test_backoff_grows_and_caps() {
    let backoff = Backoff::new(crate::config::BackoffConfig {
        initial_seconds: 10,
        max_seconds: 60,
        multiplier: 2.0,
        jitter: 0.0,
    });

    assert_eq!(backoff.base_delay(1), Duration::from_secs(10));
    assert_eq!(backoff.base_delay(2), Duration::from_secs(20));
    assert_eq!(backoff.base_delay(3), Duration::from_secs(40));
    assert_eq!(backoff.base_delay(4), Duration::from_secs(60));
    assert_eq!(backoff.base_delay(40), Duration::from_secs(60));
}

#[test]
fn test_backoff_jitter_bounds_and_minimum() {
    let mut rng = StdRng::seed_from_u64(7);
    let backoff = Backoff::new(crate::config::BackoffConfig::default());
    for round in 1..50 {
        let delay = backoff.delay(round, &mut rng);
        assert!(delay >= Duration::from_secs(48), "{:?}", delay);
        assert!(delay <= Duration::from_secs(72), "{:?}", delay);
    }

    let tiny = Backoff::new(crate::config::BackoffConfig {
        initial_seconds: 0,
        max_seconds: 0,
        multiplier: 1.0,
        jitter: 0.5,
    });
    assert_eq!(tiny.delay(1, &mut rng), MIN_DELAY);
}

#[test]
fn test_cap_to_remaining() {
    let delay = Duration::from_secs(60);
    assert_eq!(cap_to_remaining(delay, None), delay);
    assert_eq!(cap_to_remaining(delay, Some(Duration::from_secs(5))), Duration::from_secs(5));
    assert_eq!(cap_to_remaining(delay, Some(Duration::from_secs(500))), delay);
}

#[test]
fn test_store_retry_recovers_from_transient_failures() {
    let clock = ManualClock::at_epoch();
    let retry = StoreRetry::new(
        crate::config::StoreRetryConfig {
            attempts: 3,
            interval_seconds: 30,
        },
        &clock,
    );

    let mut calls = 0;
    let value = retry
        .run("test", || {
            calls += 1;
            if calls < 3 {
                Err(LeaseError::StoreUnavailable("flaky".to_string()))
            } else {
                Ok(42)
            }
        })
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(30); 2]);

    let mut calls = 0;
    let err = retry
        .run("test", || -> Result<()> {
            calls += 1;
            Err(LeaseError::InvalidRequest("bad".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, LeaseError::InvalidRequest(_)));
    assert_eq!(calls, 1, "non-transient errors are not retried");
}

#[test]
fn test_acquire_satisfied_in_first_round() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    let result = acquirer
        .acquire(&request(&["m1", "m2", "m3"], CountRequest::Exact(2), me.clone(), 600))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert_eq!(result.rounds, 1);
    assert_eq!(result.machines().len(), 2);
    assert!(clock.sleeps().is_empty());

    let mut held = held_by(&store, &me);
    held.sort();
    let mut machines = result.machines();
    machines.sort();
    assert_eq!(held, machines);
    for record in &result.records {
        assert_eq!(record.expires_at, clock.now() + chrono::Duration::minutes(180));
    }
}

#[test]
fn test_range_settles_when_fewer_are_free() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m4", 3600);
    foreign_claim(&store, &clock, "m5", 3600);
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    let result = acquirer
        .acquire(&request(
            &["m1", "m2", "m3", "m4", "m5"],
            CountRequest::Range { min: 2, max: 5 },
            me.clone(),
            600,
        ))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert_eq!(result.rounds, 1);
    let machines: BTreeSet<_> = result.machines().into_iter().collect();
    assert_eq!(machines, BTreeSet::from(["m1".to_string(), "m2".to_string(), "m3".to_string()]));
}

#[test]
fn test_exact_count_times_out_and_releases_everything() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m4", 7200);
    foreign_claim(&store, &clock, "m5", 7200);
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    let result = acquirer
        .acquire(&request(
            &["m1", "m2", "m3", "m4", "m5"],
            CountRequest::Exact(5),
            me.clone(),
            300,
        ))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::TimedOut);
    assert!(result.records.is_empty());
    assert!(held_by(&store, &me).is_empty());
    assert_eq!(store.list().unwrap().len(), 2);
    assert!(result.rounds > 1);
}

#[test]
fn test_timeout_is_bounded() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m1", 7200);
    let acquirer = Acquirer::new(&store, &clock, &test_config());

    let result = acquirer
        .acquire(&request(&["m1"], CountRequest::Exact(1), holder("100", "1"), 300))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::TimedOut);
    assert_eq!(
        result.finished_at - result.started_at,
        chrono::Duration::seconds(300)
    );

    let sleeps = clock.sleeps();
    let (last, earlier) = sleeps.split_last().unwrap();
    assert!(*last <= Duration::from_secs(72));
    for delay in earlier {
        assert!(*delay >= Duration::from_secs(48) && *delay <= Duration::from_secs(72));
    }
    assert_eq!(result.rounds as usize, sleeps.len() + 1);
}

#[test]
fn test_expired_lease_is_taken_over() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m1", 10);
    clock.advance(chrono::Duration::seconds(11));

    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");
    let mut req = request(&["m1"], CountRequest::Exact(1), me.clone(), 60);
    req.machine = Some("m1".to_string());

    let result = acquirer.acquire(&req).unwrap();
    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert_eq!(result.machines(), vec!["m1"]);
    assert_eq!(store.read("m1").unwrap().unwrap().holder, me);
}

#[test]
fn test_waits_for_lease_to_expire() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m1", 10);

    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let result = acquirer
        .acquire(&request(&["m1"], CountRequest::Exact(1), holder("100", "1"), 600))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert_eq!(result.rounds, 2);
    assert_eq!(clock.sleeps().len(), 1);
}

#[test]
fn test_partial_policy_keeps_minimum_at_deadline() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m3", 7200);
    foreign_claim(&store, &clock, "m4", 7200);
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    let count = CountRequest::Conditions {
        target: ">=100%".parse::<CountCondition>().unwrap(),
        minimum: ">=50%".parse::<CountCondition>().unwrap(),
    };
    let result = acquirer
        .acquire(&request(&["m1", "m2", "m3", "m4"], count, me.clone(), 300))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::PartiallyClaimed);
    assert_eq!(result.thresholds.minimum, 2);
    assert_eq!(result.thresholds.target, 4);
    let mut held = held_by(&store, &me);
    held.sort();
    assert_eq!(held, vec!["m1", "m2"]);

    // Kept machines were renewed every round after the first
    for record in &result.records {
        assert_eq!(record.renewals, result.rounds - 1);
    }
}

#[test]
fn test_all_or_nothing_releases_partial_claims() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m3", 7200);
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    let mut req = request(&["m1", "m2", "m3"], CountRequest::Exact(3), me.clone(), 300);
    req.policy = FulfillmentPolicy::AllOrNothing;
    let result = acquirer.acquire(&req).unwrap();

    assert_eq!(result.phase, AcquirePhase::TimedOut);
    assert!(held_by(&store, &me).is_empty());
    // Every round claimed the two free machines again after releasing them
    assert_eq!(store.claim_attempts(), 2 * result.rounds as usize);
}

#[test]
fn test_no_timeout_waits_until_machine_frees_up() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m1", 3 * 3600);
    let acquirer = Acquirer::new(&store, &clock, &test_config());

    let mut req = request(&["m1"], CountRequest::Exact(1), holder("100", "1"), 0);
    req.timeout = None;
    let result = acquirer.acquire(&req).unwrap();

    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert!(result.finished_at - result.started_at >= chrono::Duration::hours(3));
}

#[test]
fn test_invalid_requests_fail_before_claiming() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    let acquirer = Acquirer::new(&store, &clock, &test_config());

    let mut req = request(&["m1", "m2"], CountRequest::Exact(2), holder("100", "1"), 60);
    req.machine = Some("m1".to_string());
    assert!(matches!(acquirer.acquire(&req), Err(LeaseError::InvalidRequest(_))));

    let mut req = request(&["m1", "m2"], CountRequest::Exact(1), holder("100", "1"), 60);
    req.machine = Some("m9".to_string());
    assert!(matches!(acquirer.acquire(&req), Err(LeaseError::InvalidRequest(_))));

    let req = request(&["m1", "m2"], CountRequest::Exact(3), holder("100", "1"), 60);
    assert!(matches!(acquirer.acquire(&req), Err(LeaseError::InvalidRequest(_))));

    // Representable as a chrono duration, but past the end of the calendar
    let req = request(&["m1"], CountRequest::Exact(1), holder("100", "1"), 9_000_000_000_000);
    assert!(matches!(acquirer.acquire(&req), Err(LeaseError::InvalidRequest(_))));

    assert_eq!(store.claim_attempts(), 0);
}

#[test]
fn test_store_unavailable_propagates_after_releasing_claims() {
    let store = MemoryLockStore::new();
    let clock = ManualClock::at_epoch();
    foreign_claim(&store, &clock, "m2", 7200);
    let acquirer = Acquirer::new(&store, &clock, &test_config());
    let me = holder("100", "1");

    // Round one: two reads and the claim of m1; round two's renewal then
    // fails through the whole retry budget.
    store.fail_after(3, 2);
    let err = acquirer
        .acquire(&request(&["m1", "m2"], CountRequest::Exact(2), me.clone(), 600))
        .unwrap_err();

    assert!(err.is_transient());
    assert!(held_by(&store, &me).is_empty());
}

#[test]
fn test_concurrent_acquirers_never_share_machines() {
    let store = MemoryLockStore::new();
    let config = test_config();
    let pool = ["m1", "m2", "m3"];

    let results: Vec<(Holder, Acquisition)> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|job| {
                let store = &store;
                let config = &config;
                s.spawn(move || {
                    let clock = ManualClock::at_epoch();
                    let me = holder("100", &job.to_string());
                    let acquirer = Acquirer::new(store, &clock, config);
                    let result = acquirer
                        .acquire(&request(&pool, CountRequest::Exact(1), me.clone(), 600))
                        .unwrap();
                    (me, result)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = BTreeSet::new();
    let mut satisfied = 0;
    for (me, result) in &results {
        match result.phase {
            AcquirePhase::Satisfied => {
                satisfied += 1;
                let machine = result.machines()[0].clone();
                assert!(seen.insert(machine.clone()), "{} assigned twice", machine);
                assert_eq!(&store.read(&machine).unwrap().unwrap().holder, me);
            }
            AcquirePhase::TimedOut => assert!(held_by(&store, me).is_empty()),
            other => panic!("unexpected phase {}", other),
        }
    }
    assert_eq!(satisfied, 3);
}

#[test]
fn test_concurrent_acquirers_on_fs_store() {
    let (_temp_dir, store) = create_test_store();
    let config = test_config();
    let pool = ["m1", "m2", "m3"];

    let results: Vec<Acquisition> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|job| {
                let store: &FsLockStore = &store;
                let config = &config;
                s.spawn(move || {
                    let clock = ManualClock::at_epoch();
                    let acquirer = Acquirer::new(store, &clock, config);
                    acquirer
                        .acquire(&request(
                            &pool,
                            CountRequest::Exact(2),
                            holder("200", &job.to_string()),
                            600,
                        ))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let satisfied: Vec<_> = results
        .iter()
        .filter(|r| r.phase == AcquirePhase::Satisfied)
        .collect();
    assert_eq!(satisfied.len(), 1);
    assert_eq!(satisfied[0].machines().len(), 2);
    assert_eq!(store.list().unwrap().len(), 2);
}

#[test]
fn test_corrupt_record_does_not_block_the_pool() {
    let (_temp_dir, store) = create_test_store();
    std::fs::write(store.context().record_path("m1"), "{garbage").unwrap();
    let clock = ManualClock::at_epoch();
    let acquirer = Acquirer::new(&store, &clock, &test_config());

    let result = acquirer
        .acquire(&request(&["m1", "m2", "m3"], CountRequest::Exact(1), holder("100", "1"), 600))
        .unwrap();

    assert_eq!(result.phase, AcquirePhase::Satisfied);
    assert_eq!(result.rounds, 1);
    assert_ne!(result.machines(), vec!["m1"]);
}
