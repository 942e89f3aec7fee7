#![forbid(unsafe_code)]

use qc_core::model::JobState;

#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub priority: i64,
    pub run_at_ms: i64,
    pub attempts: i64,
    pub max_retries: i64,
    pub backoff_base: f64,
    /// Per-job execution timeout in seconds; 0 defers to the global
    /// `job_timeout_s` config value.
    pub timeout_s: i64,
    pub locked_by: Option<String>,
    pub lock_expires_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub stdout_tail: Option<String>,
    pub stderr_tail: Option<String>,
    pub exit_code: Option<i64>,
    pub duration_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub pid: i64,
    pub started_at_ms: i64,
    pub last_heartbeat_ms: i64,
}

#[derive(Clone, Debug, Default)]
pub struct JobsListRequest {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
    /// Restrict to pending jobs whose `run_at` has already passed.
    pub pending_ready_only: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

/// Config values captured into the job row at enqueue time; captured values
/// never change for the job's lifetime.
#[derive(Clone, Copy, Debug)]
pub struct ConfigSnapshot {
    pub max_retries: i64,
    pub backoff_base: f64,
    pub job_timeout_s: i64,
}
