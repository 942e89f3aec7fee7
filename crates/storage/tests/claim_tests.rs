#![forbid(unsafe_code)]

mod support;

use qc_core::model::JobState;
use support::{cleanup, open_store, spec};

#[test]
fn claim_installs_the_lease_and_transitions_to_processing() {
    let (mut store, db_path) = open_store("claim_lease");
    store.enqueue(&spec(Some("a"), "true"), 0).expect("enqueue");

    let now = 50_000;
    let job = store.claim_next("w1", now).expect("claim").expect("some");
    assert_eq!(job.id, "a");
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.locked_by.as_deref(), Some("w1"));
    // Default lock_timeout_s is 300.
    assert_eq!(job.lock_expires_at_ms, Some(now + 300_000));
    assert_eq!(job.started_at_ms, Some(now));

    cleanup(&db_path);
}

#[test]
fn claim_order_is_priority_then_run_at_then_created_at() {
    let (mut store, db_path) = open_store("claim_order");
    let mut low = spec(Some("p1"), "true");
    low.priority = 1;
    let mut mid = spec(Some("p10"), "true");
    mid.priority = 10;
    let mut high = spec(Some("p100"), "true");
    high.priority = 100;
    store.enqueue(&low, 0).expect("low");
    store.enqueue(&mid, 1).expect("mid");
    store.enqueue(&high, 2).expect("high");

    let order: Vec<String> = (0..3)
        .map(|_| {
            let job = store.claim_next("w1", 10).expect("claim").expect("some");
            store
                .record_success(&job.id, "w1", 0, "", "", 1, 10)
                .expect("finish");
            job.id
        })
        .collect();
    assert_eq!(order, vec!["p100", "p10", "p1"]);

    cleanup(&db_path);
}

#[test]
fn equal_priority_breaks_ties_by_run_at_then_created_at() {
    let (mut store, db_path) = open_store("claim_ties");
    let mut early = spec(Some("early"), "true");
    early.run_at = Some("1970-01-01T00:00:01Z".to_string());
    let mut late = spec(Some("late"), "true");
    late.run_at = Some("1970-01-01T00:00:05Z".to_string());
    store.enqueue(&late, 0).expect("late");
    store.enqueue(&early, 1).expect("early");

    let first = store.claim_next("w1", 10_000).expect("claim").expect("some");
    assert_eq!(first.id, "early");

    cleanup(&db_path);
}

#[test]
fn scheduled_jobs_are_invisible_until_run_at() {
    let (mut store, db_path) = open_store("claim_scheduled");
    let mut request = spec(Some("later"), "true");
    request.run_at = Some("1970-01-01T00:00:05Z".to_string());
    store.enqueue(&request, 0).expect("enqueue");

    assert!(store.claim_next("w1", 4_999).expect("claim").is_none());
    let job = store.claim_next("w1", 5_000).expect("claim").expect("some");
    assert_eq!(job.id, "later");

    cleanup(&db_path);
}

#[test]
fn a_processing_job_is_not_claimable_again() {
    let (mut store, db_path) = open_store("claim_once");
    store.enqueue(&spec(Some("solo"), "true"), 0).expect("enqueue");

    assert!(store.claim_next("w1", 0).expect("claim").is_some());
    assert!(store.claim_next("w2", 1).expect("claim").is_none());

    cleanup(&db_path);
}

#[test]
fn empty_queue_yields_none() {
    let (mut store, db_path) = open_store("claim_empty");
    assert!(store.claim_next("w1", 0).expect("claim").is_none());
    cleanup(&db_path);
}
