#![forbid(unsafe_code)]

mod store;

pub use store::{
    ConfigSnapshot, JobRecord, JobsListRequest, QueueStats, SqliteStore, StoreError, WorkerRecord,
    DB_PATH_ENV, default_db_path, resolve_db_path,
};
