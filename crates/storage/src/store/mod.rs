#![forbid(unsafe_code)]
//! Storage implementation (split-friendly module root).

mod config;
mod error;
mod jobs;
mod support;
mod types;
mod workers;

use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub use error::StoreError;
pub use types::*;

use support::migrate_schema;

/// Environment override for the database file location.
pub const DB_PATH_ENV: &str = "QUEUECTL_DB_PATH";

const DEFAULT_DB_DIRNAME: &str = ".queuectl";
const DEFAULT_DB_FILENAME: &str = "queue.db";
const BUSY_TIMEOUT_MS: u64 = 30_000;

/// Default database location: `~/.queuectl/queue.db` (falling back to the
/// current directory when HOME is unset).
pub fn default_db_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(DEFAULT_DB_DIRNAME).join(DEFAULT_DB_FILENAME)
}

/// Resolve the database path: explicit flag, then environment, then default.
pub fn resolve_db_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(DB_PATH_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => default_db_path(),
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply the
    /// schema plus seeded config defaults.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        let store = Self { db_path, conn };
        migrate_schema(&store.conn)?;
        store.seed_config_defaults()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
