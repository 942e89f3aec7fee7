#![forbid(unsafe_code)]

use std::path::Path;

use serde_json::json;

use qc_core::config::ConfigKey;
use qc_core::model::JobState;
use qc_core::payload::parse_enqueue_payload;
use qc_core::timeutil::{now_ms, ts_ms_to_rfc3339};
use qc_storage::{JobsListRequest, SqliteStore};

use crate::CliError;
use crate::render;
use crate::supervisor::{STOP_GRACE, Supervisor};

const LIVE_HEARTBEAT_MS: i64 = 10_000;

fn open(db_path: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(db_path)
        .map_err(|err| CliError::Failure(format!("cannot open {}: {err}", db_path.display())))
}

fn reject_extra_args(rest: &[String]) -> Result<(), CliError> {
    if let Some(extra) = rest.first() {
        return Err(CliError::Input(format!("unexpected argument: {extra}")));
    }
    Ok(())
}

pub(crate) fn init(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    reject_extra_args(rest)?;
    let store = open(db_path)?;
    println!("initialized queue database at {}", store.db_path().display());
    Ok(())
}

pub(crate) fn enqueue(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let mut inline: Option<String> = None;
    let mut file: Option<String> = None;

    let mut i = 0usize;
    while i < rest.len() {
        match rest[i].as_str() {
            "--file" | "-f" => {
                i += 1;
                let v = rest
                    .get(i)
                    .ok_or_else(|| CliError::Input("--file requires PATH".to_string()))?;
                file = Some(v.to_string());
            }
            other if inline.is_none() && !other.starts_with('-') => {
                inline = Some(other.to_string());
            }
            other => return Err(CliError::Input(format!("unexpected argument: {other}"))),
        }
        i += 1;
    }

    let text = match (inline, file) {
        (Some(_), Some(_)) => {
            return Err(CliError::Input(
                "provide inline JSON or --file, not both".to_string(),
            ));
        }
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|err| CliError::Input(format!("cannot read {path}: {err}")))?,
        (None, None) => {
            return Err(CliError::Input(
                "provide a JSON payload or --file".to_string(),
            ));
        }
    };

    let specs = parse_enqueue_payload(&text)?;
    let mut store = open(db_path)?;
    let mut enqueued = 0usize;
    for spec in &specs {
        let job = store.enqueue(spec, now_ms())?;
        println!("enqueued job {}", job.id);
        enqueued += 1;
    }
    if enqueued > 1 {
        println!("enqueued {enqueued} jobs");
    }
    Ok(())
}

pub(crate) fn list(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let mut request = JobsListRequest::default();
    let mut as_json = false;

    let mut i = 0usize;
    while i < rest.len() {
        match rest[i].as_str() {
            "--state" | "-s" => {
                i += 1;
                let v = rest
                    .get(i)
                    .ok_or_else(|| CliError::Input("--state requires STATE".to_string()))?;
                let state = JobState::parse(v)
                    .ok_or_else(|| CliError::Input(format!("unknown state: {v}")))?;
                request.state = Some(state);
            }
            "--limit" | "-l" => {
                i += 1;
                let v = rest
                    .get(i)
                    .ok_or_else(|| CliError::Input("--limit requires N".to_string()))?;
                let limit: usize = v
                    .parse()
                    .map_err(|_| CliError::Input("--limit must be an integer".to_string()))?;
                request.limit = Some(limit);
            }
            "--pending-ready-only" => request.pending_ready_only = true,
            "--json" => as_json = true,
            other => return Err(CliError::Input(format!("unexpected argument: {other}"))),
        }
        i += 1;
    }

    let store = open(db_path)?;
    let jobs = store.list_jobs(&request)?;

    if as_json {
        let values: Vec<serde_json::Value> = jobs.iter().map(render::job_to_json).collect();
        println!("{}", serde_json::Value::Array(values));
        return Ok(());
    }
    if jobs.is_empty() {
        println!("no jobs found");
        return Ok(());
    }
    render::print_job_table(&jobs);
    Ok(())
}

pub(crate) fn status(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let mut as_json = false;
    for arg in rest {
        match arg.as_str() {
            "--json" => as_json = true,
            other => return Err(CliError::Input(format!("unexpected argument: {other}"))),
        }
    }

    let store = open(db_path)?;
    let now = now_ms();
    let stats = store.stats()?;
    let oldest_pending_age_s = store.oldest_pending_age_s(now)?;
    let avg_duration_ms = store.avg_duration_ms()?;
    let workers = store.live_workers(now, LIVE_HEARTBEAT_MS)?;
    let config = store.config_all()?;
    let supervisor = Supervisor::new(db_path);
    let pids = supervisor.running_pids();

    if as_json {
        let mut config_map = serde_json::Map::new();
        for (key, value) in &config {
            config_map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        let payload = json!({
            "db_path": store.db_path().display().to_string(),
            "job_counts": render::stats_to_json(&stats),
            "workers": {
                "active": workers.len(),
                "pids": pids,
                "registered": workers.iter().map(render::worker_to_json).collect::<Vec<_>>(),
            },
            "metrics": {
                "oldest_pending_age_s": oldest_pending_age_s,
                "avg_duration_ms": avg_duration_ms,
            },
            "config": config_map,
        });
        println!("{payload}");
        return Ok(());
    }

    println!("queuectl status");
    println!("database: {}", store.db_path().display());
    println!();
    println!("job counts:");
    println!("  pending:    {}", stats.pending);
    println!("  processing: {}", stats.processing);
    println!("  completed:  {}", stats.completed);
    println!("  failed:     {}", stats.failed);
    println!("  dead:       {}", stats.dead);
    println!();
    println!("workers:");
    println!("  active: {}", workers.len());
    if pids.is_empty() {
        println!("  pids: -");
    } else {
        let rendered: Vec<String> = pids.iter().map(u32::to_string).collect();
        println!("  pids: {}", rendered.join(", "));
    }
    for worker in &workers {
        println!(
            "  {} (pid {}, heartbeat {})",
            worker.worker_id,
            worker.pid,
            ts_ms_to_rfc3339(worker.last_heartbeat_ms)
        );
    }
    println!();
    println!("metrics:");
    match oldest_pending_age_s {
        Some(age) => println!("  oldest pending: {age:.1}s ago"),
        None => println!("  oldest pending: -"),
    }
    match avg_duration_ms {
        Some(avg) => println!("  average duration: {avg:.0}ms"),
        None => println!("  average duration: -"),
    }
    println!();
    println!("config:");
    for (key, value) in &config {
        println!("  {key}={value}");
    }
    Ok(())
}

pub(crate) fn logs(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let Some(job_id) = rest.first() else {
        return Err(CliError::Input("logs requires a job id".to_string()));
    };
    reject_extra_args(&rest[1..])?;

    let store = open(db_path)?;
    let Some(job) = store.get_job(job_id)? else {
        return Err(CliError::Failure(format!("job not found: {job_id}")));
    };

    println!("job {}", job.id);
    println!("command: {}", job.command);
    println!("state: {}", job.state.as_str());
    println!("attempts: {}/{}", job.attempts, job.max_retries);
    match job.exit_code {
        Some(code) => println!("exit code: {code}"),
        None => println!("exit code: -"),
    }
    match job.duration_ms {
        Some(ms) => println!("duration: {ms}ms"),
        None => println!("duration: -"),
    }
    if let Some(error) = job.last_error.as_deref() {
        println!("last error: {error}");
    }
    println!("created: {}", ts_ms_to_rfc3339(job.created_at_ms));
    println!("updated: {}", ts_ms_to_rfc3339(job.updated_at_ms));

    let stdout = job.stdout_tail.as_deref().unwrap_or("");
    let stderr = job.stderr_tail.as_deref().unwrap_or("");
    if !stdout.is_empty() {
        println!("\nstdout (tail):\n{stdout}");
    }
    if !stderr.is_empty() {
        println!("\nstderr (tail):\n{stderr}");
    }
    if stdout.is_empty() && stderr.is_empty() {
        println!("\nno output captured");
    }
    Ok(())
}

pub(crate) fn worker(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let Some(action) = rest.first() else {
        return Err(CliError::Input("worker requires start|stop".to_string()));
    };
    let rest = &rest[1..];

    match action.as_str() {
        "start" => {
            let mut count = 1usize;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--count" | "-c" => {
                        i += 1;
                        let v = rest
                            .get(i)
                            .ok_or_else(|| CliError::Input("--count requires N".to_string()))?;
                        count = v.parse().map_err(|_| {
                            CliError::Input("--count must be an integer".to_string())
                        })?;
                    }
                    other => {
                        return Err(CliError::Input(format!("unexpected argument: {other}")));
                    }
                }
                i += 1;
            }
            if count < 1 {
                return Err(CliError::Input("worker count must be >= 1".to_string()));
            }

            // Make sure the database exists before workers race to open it.
            open(db_path)?;
            let supervisor = Supervisor::new(db_path);
            let spawned = supervisor.start(count)?;
            for worker in &spawned {
                println!("started worker {} (pid {})", worker.worker_id, worker.pid);
            }
            println!("started {} worker(s)", spawned.len());
            Ok(())
        }
        "stop" => {
            reject_extra_args(rest)?;
            let supervisor = Supervisor::new(db_path);
            let stopped = supervisor.stop(STOP_GRACE)?;
            if stopped == 0 {
                println!("no workers to stop");
            } else {
                println!("stopped {stopped} worker(s)");
            }
            Ok(())
        }
        other => Err(CliError::Input(format!("unknown worker action: {other}"))),
    }
}

pub(crate) fn dlq(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let Some(action) = rest.first() else {
        return Err(CliError::Input("dlq requires list|retry".to_string()));
    };
    let rest = &rest[1..];

    match action.as_str() {
        "list" => {
            let mut as_json = false;
            let mut limit: Option<usize> = None;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--json" => as_json = true,
                    "--limit" | "-l" => {
                        i += 1;
                        let v = rest
                            .get(i)
                            .ok_or_else(|| CliError::Input("--limit requires N".to_string()))?;
                        limit = Some(v.parse().map_err(|_| {
                            CliError::Input("--limit must be an integer".to_string())
                        })?);
                    }
                    other => {
                        return Err(CliError::Input(format!("unexpected argument: {other}")));
                    }
                }
                i += 1;
            }

            let store = open(db_path)?;
            let jobs = store.dlq_list(limit)?;
            if as_json {
                let values: Vec<serde_json::Value> =
                    jobs.iter().map(render::job_to_json).collect();
                println!("{}", serde_json::Value::Array(values));
                return Ok(());
            }
            if jobs.is_empty() {
                println!("dead letter queue is empty");
                return Ok(());
            }
            render::print_job_table(&jobs);
            Ok(())
        }
        "retry" => {
            let Some(job_id) = rest.first() else {
                return Err(CliError::Input("dlq retry requires a job id".to_string()));
            };
            reject_extra_args(&rest[1..])?;
            let mut store = open(db_path)?;
            let job = store.dlq_retry(job_id, now_ms())?;
            println!("job {} moved back to pending", job.id);
            Ok(())
        }
        other => Err(CliError::Input(format!("unknown dlq action: {other}"))),
    }
}

pub(crate) fn config(db_path: &Path, rest: &[String]) -> Result<(), CliError> {
    let Some(action) = rest.first() else {
        return Err(CliError::Input("config requires get|set".to_string()));
    };
    let rest = &rest[1..];

    match action.as_str() {
        "get" => {
            reject_extra_args(rest.get(1..).unwrap_or(&[]))?;
            let store = open(db_path)?;
            match rest.first() {
                Some(raw_key) => {
                    let key = ConfigKey::parse(raw_key)
                        .ok_or_else(|| CliError::Input(format!("unknown config key: {raw_key}")))?;
                    println!("{}={}", key.as_str(), store.config_get(key)?);
                }
                None => {
                    for (key, value) in store.config_all()? {
                        println!("{key}={value}");
                    }
                }
            }
            Ok(())
        }
        "set" => {
            let (Some(raw_key), Some(raw_value)) = (rest.first(), rest.get(1)) else {
                return Err(CliError::Input("config set requires KEY and VALUE".to_string()));
            };
            reject_extra_args(rest.get(2..).unwrap_or(&[]))?;
            let key = ConfigKey::parse(raw_key)
                .ok_or_else(|| CliError::Input(format!("unknown config key: {raw_key}")))?;
            let mut store = open(db_path)?;
            let stored = store.config_set(key, raw_value)?;
            println!("set {}={stored}", key.as_str());
            Ok(())
        }
        other => Err(CliError::Input(format!("unknown config action: {other}"))),
    }
}
