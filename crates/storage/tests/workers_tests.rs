#![forbid(unsafe_code)]

mod support;

use support::{cleanup, open_store};

#[test]
fn register_heartbeat_deregister_lifecycle() {
    let (mut store, db_path) = open_store("workers_lifecycle");

    store.register_worker("host#100#1", 100, 0).expect("register");
    store.register_worker("host#101#2", 101, 0).expect("register");

    let live = store.live_workers(1_000, 10_000).expect("live");
    assert_eq!(live.len(), 2);

    store.worker_heartbeat("host#100#1", 5_000).expect("beat");
    let live = store.live_workers(15_000, 10_000).expect("live");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].worker_id, "host#100#1");
    assert_eq!(live[0].last_heartbeat_ms, 5_000);

    assert!(store.deregister_worker("host#100#1").expect("deregister"));
    assert!(!store.deregister_worker("host#100#1").expect("second"));
    assert!(store.live_workers(15_000, 10_000).expect("live").is_empty());

    cleanup(&db_path);
}

#[test]
fn reregistering_takes_over_the_row() {
    let (mut store, db_path) = open_store("workers_rereg");
    store.register_worker("w", 100, 0).expect("first");
    let record = store.register_worker("w", 200, 9_000).expect("second");
    assert_eq!(record.pid, 200);

    let live = store.live_workers(9_000, 10_000).expect("live");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].pid, 200);
    cleanup(&db_path);
}

#[test]
fn stale_rows_are_purged() {
    let (mut store, db_path) = open_store("workers_stale");
    store.register_worker("old", 1, 0).expect("old");
    store.register_worker("new", 2, 50_000).expect("new");

    let removed = store.cleanup_stale_workers(60_000, 30_000).expect("cleanup");
    assert_eq!(removed, 1);

    let live = store.live_workers(60_000, 30_000).expect("live");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].worker_id, "new");
    cleanup(&db_path);
}
