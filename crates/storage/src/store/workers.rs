#![forbid(unsafe_code)]

use rusqlite::params;

use super::{SqliteStore, StoreError, WorkerRecord};

const MAX_WORKER_ID_LEN: usize = 255;

fn normalize_worker_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("worker_id must not be empty"));
    }
    if raw.len() > MAX_WORKER_ID_LEN {
        return Err(StoreError::InvalidInput("worker_id is too long"));
    }
    Ok(raw.to_string())
}

fn read_worker_row(row: &rusqlite::Row<'_>) -> Result<WorkerRecord, rusqlite::Error> {
    Ok(WorkerRecord {
        worker_id: row.get(0)?,
        pid: row.get(1)?,
        started_at_ms: row.get(2)?,
        last_heartbeat_ms: row.get(3)?,
    })
}

impl SqliteStore {
    /// Register (or re-register) a worker process. A worker id restarting
    /// with a new pid takes over its old row.
    pub fn register_worker(
        &mut self,
        worker_id: &str,
        pid: i64,
        now_ms: i64,
    ) -> Result<WorkerRecord, StoreError> {
        let worker_id = normalize_worker_id(worker_id)?;
        self.conn.execute(
            r#"
            INSERT INTO workers(worker_id, pid, started_at_ms, last_heartbeat_ms)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(worker_id) DO UPDATE SET
              pid=excluded.pid,
              started_at_ms=excluded.started_at_ms,
              last_heartbeat_ms=excluded.last_heartbeat_ms
            "#,
            params![worker_id.as_str(), pid, now_ms],
        )?;
        Ok(WorkerRecord {
            worker_id,
            pid,
            started_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
        })
    }

    pub fn worker_heartbeat(&mut self, worker_id: &str, now_ms: i64) -> Result<(), StoreError> {
        let worker_id = normalize_worker_id(worker_id)?;
        self.conn.execute(
            "UPDATE workers SET last_heartbeat_ms=?2 WHERE worker_id=?1",
            params![worker_id.as_str(), now_ms],
        )?;
        Ok(())
    }

    /// Remove a worker's registry row on clean shutdown. Returns whether a
    /// row existed.
    pub fn deregister_worker(&mut self, worker_id: &str) -> Result<bool, StoreError> {
        let worker_id = normalize_worker_id(worker_id)?;
        let changed = self.conn.execute(
            "DELETE FROM workers WHERE worker_id=?1",
            params![worker_id.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Workers whose heartbeat is fresher than `stale_after_ms`.
    pub fn live_workers(
        &self,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<Vec<WorkerRecord>, StoreError> {
        let threshold = now_ms.saturating_sub(stale_after_ms);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT worker_id, pid, started_at_ms, last_heartbeat_ms
            FROM workers
            WHERE last_heartbeat_ms >= ?1
            ORDER BY started_at_ms ASC, worker_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![threshold], read_worker_row)?;
        let mut workers = Vec::new();
        for row in rows {
            workers.push(row?);
        }
        Ok(workers)
    }

    /// Drop registry rows left behind by crashed workers. Returns the number
    /// removed.
    pub fn cleanup_stale_workers(
        &mut self,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<usize, StoreError> {
        let threshold = now_ms.saturating_sub(stale_after_ms);
        let changed = self.conn.execute(
            "DELETE FROM workers WHERE last_heartbeat_ms < ?1",
            params![threshold],
        )?;
        Ok(changed)
    }
}
