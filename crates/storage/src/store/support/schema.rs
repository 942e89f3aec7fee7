#![forbid(unsafe_code)]

use rusqlite::Connection;

use crate::store::StoreError;

const SQL: &str = r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS jobs (
          id TEXT PRIMARY KEY,
          command TEXT NOT NULL,
          state TEXT NOT NULL DEFAULT 'pending',
          priority INTEGER NOT NULL DEFAULT 0,
          run_at_ms INTEGER NOT NULL,
          attempts INTEGER NOT NULL DEFAULT 0,
          max_retries INTEGER NOT NULL,
          backoff_base REAL NOT NULL,
          timeout_s INTEGER NOT NULL DEFAULT 0,
          locked_by TEXT,
          lock_expires_at_ms INTEGER,
          last_error TEXT,
          stdout_tail TEXT,
          stderr_tail TEXT,
          exit_code INTEGER,
          duration_ms INTEGER,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          started_at_ms INTEGER,
          finished_at_ms INTEGER
        );

        CREATE INDEX IF NOT EXISTS jobs_polling
          ON jobs(state, run_at_ms, priority);
        CREATE INDEX IF NOT EXISTS jobs_by_locked_by
          ON jobs(locked_by);

        CREATE TABLE IF NOT EXISTS config (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        -- Worker liveness registry. A worker upserts its row on startup and
        -- renews last_heartbeat_ms while it runs; a stale heartbeat means the
        -- process is gone and its leases will lapse on their own.
        CREATE TABLE IF NOT EXISTS workers (
          worker_id TEXT PRIMARY KEY,
          pid INTEGER NOT NULL,
          started_at_ms INTEGER NOT NULL,
          last_heartbeat_ms INTEGER NOT NULL
        );
"#;

pub(in crate::store) fn migrate_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    Ok(())
}
