#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use qc_core::payload::EnqueueSpec;
use qc_storage::SqliteStore;

static NONCE: AtomicU64 = AtomicU64::new(0);

pub fn temp_db_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let ms = qc_core::timeutil::now_ms();
    std::env::temp_dir()
        .join(format!("qc_storage_{prefix}_{pid}_{ms}_{nonce}"))
        .join("queue.db")
}

pub fn open_store(prefix: &str) -> (SqliteStore, PathBuf) {
    let db_path = temp_db_path(prefix);
    let store = SqliteStore::open(&db_path).expect("open store");
    (store, db_path)
}

pub fn cleanup(db_path: &std::path::Path) {
    if let Some(dir) = db_path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

pub fn spec(id: Option<&str>, command: &str) -> EnqueueSpec {
    EnqueueSpec {
        id: id.map(str::to_string),
        command: command.to_string(),
        priority: 0,
        run_at: None,
        timeout_s: None,
        max_retries: None,
        backoff_base: None,
    }
}
