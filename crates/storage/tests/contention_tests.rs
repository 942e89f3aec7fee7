#![forbid(unsafe_code)]

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use qc_storage::SqliteStore;
use support::{cleanup, open_store, spec};

/// N workers racing over one database file must claim each job exactly
/// once.
#[test]
fn concurrent_claimers_never_share_a_job() {
    const JOBS: usize = 20;
    const WORKERS: usize = 4;

    let (mut store, db_path) = open_store("contention");
    for i in 0..JOBS {
        store
            .enqueue(&spec(Some(&format!("job-{i:02}")), "true"), 0)
            .expect("enqueue");
    }
    drop(store);

    let idle_rounds = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let db_path = db_path.clone();
        let idle_rounds = Arc::clone(&idle_rounds);
        handles.push(std::thread::spawn(move || {
            let worker_id = format!("w{w}");
            let mut store = SqliteStore::open(&db_path).expect("open");
            let mut claimed = Vec::new();
            loop {
                let now = qc_core::timeutil::now_ms();
                match store.claim_next(&worker_id, now).expect("claim") {
                    Some(job) => {
                        store
                            .record_success(&job.id, &worker_id, 0, "", "", 1, now)
                            .expect("success");
                        claimed.push(job.id);
                    }
                    None => {
                        // A couple of empty polls across all workers means
                        // the queue is drained.
                        if idle_rounds.fetch_add(1, Ordering::SeqCst) > WORKERS * 2 {
                            break;
                        }
                        std::thread::sleep(std::time::Duration::from_millis(5));
                    }
                }
            }
            claimed
        }));
    }

    let mut all: Vec<String> = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("worker thread"));
    }

    assert_eq!(all.len(), JOBS, "every job claimed exactly once");
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(unique.len(), JOBS, "no job claimed twice");

    let store = SqliteStore::open(&db_path).expect("reopen");
    let stats = store.stats().expect("stats");
    assert_eq!(stats.completed as usize, JOBS);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);

    cleanup(&db_path);
}
