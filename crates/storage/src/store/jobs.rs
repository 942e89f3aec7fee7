#![forbid(unsafe_code)]

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use qc_core::config::ConfigKey;
use qc_core::model::JobState;
use qc_core::payload::EnqueueSpec;
use qc_core::retry;

use super::config::config_i64_on;
use super::support::tail_utf8;
use super::{JobRecord, JobsListRequest, QueueStats, SqliteStore, StoreError};

const MAX_JOB_ID_LEN: usize = 255;
const MAX_OUTPUT_TAIL_BYTES: usize = 8 * 1024;
const MAX_LAST_ERROR_LEN: usize = 1024;

const JOB_COLUMNS: &str = "id, command, state, priority, run_at_ms, attempts, max_retries, \
     backoff_base, timeout_s, locked_by, lock_expires_at_ms, last_error, stdout_tail, \
     stderr_tail, exit_code, duration_ms, created_at_ms, updated_at_ms, started_at_ms, \
     finished_at_ms";

fn normalize_job_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("job id must not be empty"));
    }
    if raw.len() > MAX_JOB_ID_LEN {
        return Err(StoreError::InvalidInput("job id is too long"));
    }
    Ok(raw.to_string())
}

fn normalize_command(raw: &str) -> Result<String, StoreError> {
    if raw.trim().is_empty() {
        return Err(StoreError::InvalidInput("command must not be empty"));
    }
    Ok(raw.to_string())
}

fn clip_error(raw: &str) -> String {
    let line: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    line.trim().chars().take(MAX_LAST_ERROR_LEN).collect()
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let state_raw: String = row.get(2)?;
    let state = JobState::parse(&state_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(2, "state".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(JobRecord {
        id: row.get(0)?,
        command: row.get(1)?,
        state,
        priority: row.get(3)?,
        run_at_ms: row.get(4)?,
        attempts: row.get(5)?,
        max_retries: row.get(6)?,
        backoff_base: row.get(7)?,
        timeout_s: row.get(8)?,
        locked_by: row.get(9)?,
        lock_expires_at_ms: row.get(10)?,
        last_error: row.get(11)?,
        stdout_tail: row.get(12)?,
        stderr_tail: row.get(13)?,
        exit_code: row.get(14)?,
        duration_ms: row.get(15)?,
        created_at_ms: row.get(16)?,
        updated_at_ms: row.get(17)?,
        started_at_ms: row.get(18)?,
        finished_at_ms: row.get(19)?,
    })
}

fn get_job_on(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1");
    Ok(conn
        .query_row(&sql, params![job_id], read_job_row)
        .optional()?)
}

/// Ownership probe used after a guarded UPDATE changed zero rows: decide
/// whether the job vanished or the lease moved on.
fn lock_conflict_on(
    conn: &Connection,
    job_id: &str,
    worker_id: &str,
) -> Result<StoreError, StoreError> {
    let current: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT state, locked_by FROM jobs WHERE id=?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match current {
        None => Ok(StoreError::UnknownJob {
            job_id: job_id.to_string(),
        }),
        Some(_) => Ok(StoreError::LostLock {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
        }),
    }
}

impl SqliteStore {
    /// Insert a new `pending` job, capturing `max_retries` and
    /// `backoff_base` from the current config unless the request overrides
    /// them.
    pub fn enqueue(&mut self, spec: &EnqueueSpec, now_ms: i64) -> Result<JobRecord, StoreError> {
        let command = normalize_command(&spec.command)?;
        let id = match spec.id.as_deref() {
            Some(raw) => normalize_job_id(raw)?,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let run_at_ms = match spec.run_at.as_deref() {
            Some(_) => spec
                .run_at_ms()
                .ok_or(StoreError::InvalidInput("run_at must be an RFC 3339 timestamp"))?,
            None => now_ms,
        };
        if spec.timeout_s.is_some_and(|t| t < 0) {
            return Err(StoreError::InvalidInput("timeout_s must be >= 0"));
        }
        if spec.max_retries.is_some_and(|r| r < 0) {
            return Err(StoreError::InvalidInput("max_retries must be >= 0"));
        }
        if spec.backoff_base.is_some_and(|b| !b.is_finite() || b <= 1.0) {
            return Err(StoreError::InvalidInput("backoff_base must be > 1"));
        }

        let tx = self.conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM jobs WHERE id=?1", params![id.as_str()], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateId { job_id: id });
        }

        let snapshot = super::config::snapshot_on(&tx)?;
        let max_retries = spec.max_retries.unwrap_or(snapshot.max_retries);
        let backoff_base = spec.backoff_base.unwrap_or(snapshot.backoff_base);
        let timeout_s = spec.timeout_s.unwrap_or(0);

        tx.execute(
            r#"
            INSERT INTO jobs(
              id, command, state, priority, run_at_ms, attempts, max_retries, backoff_base,
              timeout_s, created_at_ms, updated_at_ms
            )
            VALUES (?1, ?2, 'pending', ?3, ?4, 0, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                id.as_str(),
                command,
                spec.priority,
                run_at_ms,
                max_retries,
                backoff_base,
                timeout_s,
                now_ms
            ],
        )?;

        tx.commit()?;

        Ok(JobRecord {
            id,
            command,
            state: JobState::Pending,
            priority: spec.priority,
            run_at_ms,
            attempts: 0,
            max_retries,
            backoff_base,
            timeout_s,
            locked_by: None,
            lock_expires_at_ms: None,
            last_error: None,
            stdout_tail: None,
            stderr_tail: None,
            exit_code: None,
            duration_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
        })
    }

    /// Atomically claim the best eligible job for `worker_id`, installing a
    /// lease that expires `lock_timeout_s` from `now_ms`.
    ///
    /// Runs as an immediate transaction: the write lock is taken before the
    /// candidate select, so concurrent claimers serialize and no two can
    /// take the same row.
    pub fn claim_next(
        &mut self,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<Option<JobRecord>, StoreError> {
        if worker_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("worker_id must not be empty"));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                r#"
                SELECT id
                FROM jobs
                WHERE state='pending'
                  AND run_at_ms <= ?1
                  AND (locked_by IS NULL OR lock_expires_at_ms IS NULL OR lock_expires_at_ms <= ?1)
                ORDER BY priority DESC, run_at_ms ASC, created_at_ms ASC
                LIMIT 1
                "#,
                params![now_ms],
                |row| row.get(0),
            )
            .optional()?;
        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let lock_timeout_s = config_i64_on(&tx, ConfigKey::LockTimeoutS)?;
        let lock_expires_at_ms = now_ms.saturating_add(lock_timeout_s.saturating_mul(1000));

        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET state='processing', locked_by=?2, lock_expires_at_ms=?3,
                started_at_ms=?4, updated_at_ms=?4
            WHERE id=?1 AND state='pending'
            "#,
            params![job_id.as_str(), worker_id, lock_expires_at_ms, now_ms],
        )?;
        if changed != 1 {
            // The immediate transaction makes this unreachable in practice;
            // bail rather than hand out a row we did not transition.
            return Ok(None);
        }

        let job = get_job_on(&tx, &job_id)?.ok_or(StoreError::UnknownJob { job_id })?;
        tx.commit()?;
        Ok(Some(job))
    }

    /// Record a successful attempt: terminal `completed`, lock cleared,
    /// output tails stored. Fails with `LostLock` when the caller's lease
    /// has been reclaimed.
    #[allow(clippy::too_many_arguments)]
    pub fn record_success(
        &mut self,
        job_id: &str,
        worker_id: &str,
        exit_code: i64,
        stdout: &str,
        stderr: &str,
        duration_ms: i64,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET state='completed', locked_by=NULL, lock_expires_at_ms=NULL,
                exit_code=?3, stdout_tail=?4, stderr_tail=?5, duration_ms=?6,
                last_error=NULL, finished_at_ms=?7, updated_at_ms=?7
            WHERE id=?1 AND state='processing' AND locked_by=?2
            "#,
            params![
                job_id.as_str(),
                worker_id,
                exit_code,
                tail_utf8(stdout, MAX_OUTPUT_TAIL_BYTES),
                tail_utf8(stderr, MAX_OUTPUT_TAIL_BYTES),
                duration_ms,
                now_ms
            ],
        )?;
        if changed != 1 {
            return Err(lock_conflict_on(&tx, &job_id, worker_id)?);
        }

        tx.commit()?;
        Ok(())
    }

    /// Record a failed attempt. Increments `attempts`; once
    /// `attempts > max_retries` the job moves to the dead-letter partition,
    /// otherwise it is rescheduled to `pending` with exponential backoff.
    /// Returns the resulting state.
    #[allow(clippy::too_many_arguments)]
    pub fn record_failure(
        &mut self,
        job_id: &str,
        worker_id: &str,
        exit_code: i64,
        stdout: &str,
        stderr: &str,
        error: &str,
        duration_ms: i64,
        now_ms: i64,
    ) -> Result<JobState, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let tx = self.conn.transaction()?;

        let current: Option<(i64, i64, f64)> = tx
            .query_row(
                r#"
                SELECT attempts, max_retries, backoff_base
                FROM jobs
                WHERE id=?1 AND state='processing' AND locked_by=?2
                "#,
                params![job_id.as_str(), worker_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((attempts, max_retries, backoff_base)) = current else {
            return Err(lock_conflict_on(&tx, &job_id, worker_id)?);
        };

        let attempts = attempts + 1;
        let next_state = if attempts > max_retries {
            JobState::Dead
        } else {
            JobState::Pending
        };

        let changed = match next_state {
            JobState::Dead => tx.execute(
                r#"
                UPDATE jobs
                SET state='dead', attempts=?3, locked_by=NULL, lock_expires_at_ms=NULL,
                    exit_code=?4, stdout_tail=?5, stderr_tail=?6, last_error=?7,
                    duration_ms=?8, finished_at_ms=?9, updated_at_ms=?9
                WHERE id=?1 AND state='processing' AND locked_by=?2
                "#,
                params![
                    job_id.as_str(),
                    worker_id,
                    attempts,
                    exit_code,
                    tail_utf8(stdout, MAX_OUTPUT_TAIL_BYTES),
                    tail_utf8(stderr, MAX_OUTPUT_TAIL_BYTES),
                    clip_error(error),
                    duration_ms,
                    now_ms
                ],
            )?,
            _ => {
                let max_backoff_s = config_i64_on(&tx, ConfigKey::MaxBackoffS)?;
                let run_at_ms = retry::next_run_at_ms(
                    now_ms,
                    attempts.clamp(0, u32::MAX as i64) as u32,
                    backoff_base,
                    max_backoff_s.clamp(1, u32::MAX as i64) as u32,
                );
                tx.execute(
                    r#"
                    UPDATE jobs
                    SET state='pending', attempts=?3, run_at_ms=?4, locked_by=NULL,
                        lock_expires_at_ms=NULL, exit_code=?5, stdout_tail=?6,
                        stderr_tail=?7, last_error=?8, duration_ms=?9,
                        finished_at_ms=?10, updated_at_ms=?10
                    WHERE id=?1 AND state='processing' AND locked_by=?2
                    "#,
                    params![
                        job_id.as_str(),
                        worker_id,
                        attempts,
                        run_at_ms,
                        exit_code,
                        tail_utf8(stdout, MAX_OUTPUT_TAIL_BYTES),
                        tail_utf8(stderr, MAX_OUTPUT_TAIL_BYTES),
                        clip_error(error),
                        duration_ms,
                        now_ms
                    ],
                )?
            }
        };
        if changed != 1 {
            return Err(lock_conflict_on(&tx, &job_id, worker_id)?);
        }

        tx.commit()?;
        Ok(next_state)
    }

    /// Renew the caller's lease while its executor runs. Returns the new
    /// expiry instant.
    pub fn extend_lock(
        &mut self,
        job_id: &str,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<i64, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let tx = self.conn.transaction()?;

        let lock_timeout_s = config_i64_on(&tx, ConfigKey::LockTimeoutS)?;
        let lock_expires_at_ms = now_ms.saturating_add(lock_timeout_s.saturating_mul(1000));

        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET lock_expires_at_ms=?3, updated_at_ms=?4
            WHERE id=?1 AND state='processing' AND locked_by=?2
            "#,
            params![job_id.as_str(), worker_id, lock_expires_at_ms, now_ms],
        )?;
        if changed != 1 {
            return Err(lock_conflict_on(&tx, &job_id, worker_id)?);
        }

        tx.commit()?;
        Ok(lock_expires_at_ms)
    }

    /// Recovery pass: return every job whose lease has lapsed to `pending`
    /// without touching `attempts` (a crash is not a retry). Returns the
    /// number of jobs reclaimed.
    pub fn sweep_expired_locks(&mut self, now_ms: i64) -> Result<usize, StoreError> {
        let changed = self.conn.execute(
            r#"
            UPDATE jobs
            SET state='pending', locked_by=NULL, lock_expires_at_ms=NULL, updated_at_ms=?1
            WHERE state='processing'
              AND (lock_expires_at_ms IS NULL OR lock_expires_at_ms <= ?1)
            "#,
            params![now_ms],
        )?;
        Ok(changed)
    }

    /// Revive a dead-letter job: back to `pending` with a clean attempt
    /// counter, eligible immediately.
    pub fn dlq_retry(&mut self, job_id: &str, now_ms: i64) -> Result<JobRecord, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        let tx = self.conn.transaction()?;

        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM jobs WHERE id=?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(state) = state else {
            return Err(StoreError::UnknownJob { job_id });
        };
        if state != "dead" {
            return Err(StoreError::NotDead { job_id, state });
        }

        tx.execute(
            r#"
            UPDATE jobs
            SET state='pending', attempts=0, run_at_ms=?2, locked_by=NULL,
                lock_expires_at_ms=NULL, updated_at_ms=?2
            WHERE id=?1 AND state='dead'
            "#,
            params![job_id.as_str(), now_ms],
        )?;

        let job = get_job_on(&tx, &job_id)?.ok_or(StoreError::UnknownJob { job_id })?;
        tx.commit()?;
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let job_id = normalize_job_id(job_id)?;
        get_job_on(&self.conn, &job_id)
    }

    pub fn list_jobs(&self, request: &JobsListRequest) -> Result<Vec<JobRecord>, StoreError> {
        let now_ms = super::support::now_ms();
        let state = request.state.map(|s| s.as_str());
        let limit = request.limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE (?1 IS NULL OR state=?1)
              AND (?2 = 0 OR (state='pending' AND run_at_ms <= ?3))
            ORDER BY created_at_ms DESC, id ASC
            LIMIT ?4
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![state, request.pending_ready_only as i64, now_ms, limit],
            read_job_row,
        )?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    pub fn dlq_list(&self, limit: Option<usize>) -> Result<Vec<JobRecord>, StoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE state='dead'
            ORDER BY updated_at_ms DESC, id ASC
            LIMIT ?1
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], read_job_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (state, count) = row?;
            let count = count.max(0) as u64;
            match JobState::parse(&state) {
                Some(JobState::Pending) => stats.pending = count,
                Some(JobState::Processing) => stats.processing = count,
                Some(JobState::Completed) => stats.completed = count,
                Some(JobState::Failed) => stats.failed = count,
                Some(JobState::Dead) => stats.dead = count,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Age of the oldest pending job in seconds, for queue-health reporting.
    pub fn oldest_pending_age_s(&self, now_ms: i64) -> Result<Option<f64>, StoreError> {
        let oldest: Option<i64> = self
            .conn
            .query_row(
                "SELECT created_at_ms FROM jobs WHERE state='pending' \
                 ORDER BY created_at_ms ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(oldest.map(|created| (now_ms.saturating_sub(created)).max(0) as f64 / 1000.0))
    }

    pub fn avg_duration_ms(&self) -> Result<Option<f64>, StoreError> {
        let avg: Option<f64> = self.conn.query_row(
            "SELECT AVG(duration_ms) FROM jobs WHERE duration_ms IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(avg)
    }
}
