#![forbid(unsafe_code)]

mod support;

use qc_core::config::ConfigKey;
use qc_storage::StoreError;
use support::{cleanup, open_store};

#[test]
fn defaults_are_seeded_on_open() {
    let (store, db_path) = open_store("config_defaults");
    for key in ConfigKey::ALL {
        assert_eq!(store.config_get(key).expect("get"), key.default_value());
    }
    let all = store.config_all().expect("all");
    assert_eq!(all.len(), ConfigKey::ALL.len());
    let mut keys: Vec<&str> = all.iter().map(|(k, _)| k.as_str()).collect();
    let sorted = {
        let mut copy = keys.clone();
        copy.sort_unstable();
        copy
    };
    assert_eq!(keys, sorted, "config_all is sorted by key");
    keys.dedup();
    assert_eq!(keys.len(), ConfigKey::ALL.len());
    cleanup(&db_path);
}

#[test]
fn set_persists_the_canonical_form() {
    let (mut store, db_path) = open_store("config_set");
    let stored = store
        .config_set(ConfigKey::PollIntervalMs, " 250 ")
        .expect("set");
    assert_eq!(stored, "250");
    assert_eq!(
        store.config_get(ConfigKey::PollIntervalMs).expect("get"),
        "250"
    );
    cleanup(&db_path);
}

#[test]
fn bad_values_are_rejected() {
    let (mut store, db_path) = open_store("config_bad");
    let err = store.config_set(ConfigKey::BackoffBase, "0.5");
    assert!(matches!(err, Err(StoreError::InvalidConfigValue(_))));
    let err = store.config_set(ConfigKey::LockTimeoutS, "0");
    assert!(matches!(err, Err(StoreError::InvalidConfigValue(_))));
    let err = store.config_set(ConfigKey::MaxRetries, "many");
    assert!(matches!(err, Err(StoreError::InvalidConfigValue(_))));
    cleanup(&db_path);
}

#[test]
fn typed_getters_and_snapshot_reflect_sets() {
    let (mut store, db_path) = open_store("config_typed");
    store.config_set(ConfigKey::MaxRetries, "7").expect("set");
    store.config_set(ConfigKey::BackoffBase, "2.5").expect("set");
    store.config_set(ConfigKey::JobTimeoutS, "120").expect("set");

    assert_eq!(store.config_i64(ConfigKey::MaxRetries).expect("i64"), 7);
    assert_eq!(store.config_f64(ConfigKey::BackoffBase).expect("f64"), 2.5);

    let snapshot = store.config_snapshot().expect("snapshot");
    assert_eq!(snapshot.max_retries, 7);
    assert_eq!(snapshot.backoff_base, 2.5);
    assert_eq!(snapshot.job_timeout_s, 120);
    cleanup(&db_path);
}
