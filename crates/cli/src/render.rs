#![forbid(unsafe_code)]

use serde_json::{Value, json};

use qc_core::timeutil::ts_ms_to_rfc3339;
use qc_storage::{JobRecord, QueueStats, WorkerRecord};

const COMMAND_PREVIEW_CHARS: usize = 40;

fn opt_ts(ts_ms: Option<i64>) -> Value {
    match ts_ms {
        Some(ts) => Value::String(ts_ms_to_rfc3339(ts)),
        None => Value::Null,
    }
}

pub fn job_to_json(job: &JobRecord) -> Value {
    json!({
        "id": job.id,
        "command": job.command,
        "state": job.state.as_str(),
        "priority": job.priority,
        "run_at": ts_ms_to_rfc3339(job.run_at_ms),
        "attempts": job.attempts,
        "max_retries": job.max_retries,
        "backoff_base": job.backoff_base,
        "timeout_s": job.timeout_s,
        "locked_by": job.locked_by,
        "lock_expires_at": opt_ts(job.lock_expires_at_ms),
        "last_error": job.last_error,
        "exit_code": job.exit_code,
        "duration_ms": job.duration_ms,
        "created_at": ts_ms_to_rfc3339(job.created_at_ms),
        "updated_at": ts_ms_to_rfc3339(job.updated_at_ms),
        "started_at": opt_ts(job.started_at_ms),
        "finished_at": opt_ts(job.finished_at_ms),
    })
}

pub fn stats_to_json(stats: &QueueStats) -> Value {
    json!({
        "pending": stats.pending,
        "processing": stats.processing,
        "completed": stats.completed,
        "failed": stats.failed,
        "dead": stats.dead,
    })
}

pub fn worker_to_json(worker: &WorkerRecord) -> Value {
    json!({
        "worker_id": worker.worker_id,
        "pid": worker.pid,
        "started_at": ts_ms_to_rfc3339(worker.started_at_ms),
        "last_heartbeat": ts_ms_to_rfc3339(worker.last_heartbeat_ms),
    })
}

pub fn command_preview(command: &str) -> String {
    let flat: String = command
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= COMMAND_PREVIEW_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(COMMAND_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

pub fn print_job_table(jobs: &[JobRecord]) {
    println!(
        "{:<24} {:<43} {:<10} {:>8} {:>8}  {}",
        "ID", "COMMAND", "STATE", "ATTEMPTS", "PRIORITY", "CREATED"
    );
    for job in jobs {
        println!(
            "{:<24} {:<43} {:<10} {:>5}/{:<2} {:>8}  {}",
            truncate_id(&job.id),
            command_preview(&job.command),
            job.state.as_str(),
            job.attempts,
            job.max_retries,
            job.priority,
            ts_ms_to_rfc3339(job.created_at_ms),
        );
    }
}

pub fn truncate_id(id: &str) -> String {
    if id.chars().count() <= 24 {
        return id.to_string();
    }
    let mut out: String = id.chars().take(21).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_core::model::JobState;

    fn sample_job() -> JobRecord {
        JobRecord {
            id: "job-1".to_string(),
            command: "echo ok".to_string(),
            state: JobState::Completed,
            priority: 3,
            run_at_ms: 0,
            attempts: 1,
            max_retries: 3,
            backoff_base: 2.0,
            timeout_s: 0,
            locked_by: None,
            lock_expires_at_ms: None,
            last_error: None,
            stdout_tail: Some("ok\n".to_string()),
            stderr_tail: None,
            exit_code: Some(0),
            duration_ms: Some(12),
            created_at_ms: 1_000,
            updated_at_ms: 2_000,
            started_at_ms: Some(1_500),
            finished_at_ms: Some(2_000),
        }
    }

    #[test]
    fn job_json_uses_rfc3339_and_keeps_nulls() {
        let value = job_to_json(&sample_job());
        assert_eq!(value["state"], "completed");
        assert_eq!(value["created_at"], "1970-01-01T00:00:01Z");
        assert!(value["locked_by"].is_null());
        assert!(value["lock_expires_at"].is_null());
        assert_eq!(value["exit_code"], 0);
    }

    #[test]
    fn previews_are_bounded() {
        assert_eq!(command_preview("echo ok"), "echo ok");
        let long = "x".repeat(100);
        let preview = command_preview(&long);
        assert_eq!(preview.chars().count(), 43);
        assert!(preview.ends_with("..."));
        assert_eq!(command_preview("a\nb"), "a b");
    }

    #[test]
    fn ids_are_truncated_for_the_table() {
        assert_eq!(truncate_id("short"), "short");
        assert_eq!(truncate_id(&"i".repeat(40)).chars().count(), 24);
    }
}
