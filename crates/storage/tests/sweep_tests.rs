#![forbid(unsafe_code)]

mod support;

use qc_core::model::JobState;
use support::{cleanup, open_store, spec};

#[test]
fn sweep_reclaims_only_expired_leases() {
    let (mut store, db_path) = open_store("sweep_expired");
    store.enqueue(&spec(Some("stale"), "true"), 0).expect("stale");
    store.enqueue(&spec(Some("fresh"), "true"), 0).expect("fresh");

    // Default lock_timeout_s = 300: claim at t=0 expires at t=300_000.
    store.claim_next("w1", 0).expect("claim").expect("stale claim");
    store.claim_next("w2", 200_000).expect("claim").expect("fresh claim");

    let reclaimed = store.sweep_expired_locks(300_000).expect("sweep");
    assert_eq!(reclaimed, 1);

    let stale = store.get_job("stale").expect("get").expect("exists");
    assert_eq!(stale.state, JobState::Pending);
    assert!(stale.locked_by.is_none());
    assert_eq!(stale.attempts, 0, "recovery is not a retry");

    let fresh = store.get_job("fresh").expect("get").expect("exists");
    assert_eq!(fresh.state, JobState::Processing);
    assert_eq!(fresh.locked_by.as_deref(), Some("w2"));

    cleanup(&db_path);
}

#[test]
fn extend_lock_keeps_the_lease_ahead_of_the_sweeper() {
    let (mut store, db_path) = open_store("sweep_extend");
    store.enqueue(&spec(Some("long"), "sleep 600"), 0).expect("enqueue");
    store.claim_next("w1", 0).expect("claim").expect("some");

    let new_expiry = store.extend_lock("long", "w1", 250_000).expect("extend");
    assert_eq!(new_expiry, 250_000 + 300_000);

    assert_eq!(store.sweep_expired_locks(300_000).expect("sweep"), 0);
    let job = store.get_job("long").expect("get").expect("exists");
    assert_eq!(job.state, JobState::Processing);

    cleanup(&db_path);
}

#[test]
fn extend_lock_fails_once_the_lease_is_gone() {
    let (mut store, db_path) = open_store("sweep_lost_extend");
    store.enqueue(&spec(Some("gone"), "true"), 0).expect("enqueue");
    store.claim_next("w1", 0).expect("claim").expect("some");
    store.sweep_expired_locks(301_000).expect("sweep");

    assert!(store.extend_lock("gone", "w1", 301_001).is_err());

    cleanup(&db_path);
}

#[test]
fn hard_killed_worker_job_is_reclaimed_after_expiry() {
    let (mut store, db_path) = open_store("sweep_recovery");
    store.enqueue(&spec(Some("orphan"), "true"), 0).expect("enqueue");

    // Worker 1 claims, then dies without finalizing.
    store.claim_next("w1", 0).expect("claim").expect("some");

    // Before expiry nothing is claimable.
    store.sweep_expired_locks(100_000).expect("sweep");
    assert!(store.claim_next("w2", 100_000).expect("claim").is_none());

    // After expiry the sweep + claim hand the job to worker 2.
    store.sweep_expired_locks(300_000).expect("sweep");
    let job = store.claim_next("w2", 300_000).expect("claim").expect("some");
    assert_eq!(job.id, "orphan");
    assert_eq!(job.locked_by.as_deref(), Some("w2"));

    cleanup(&db_path);
}
