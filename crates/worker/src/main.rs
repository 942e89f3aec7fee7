#![forbid(unsafe_code)]

mod executor;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use qc_core::config::ConfigKey;
use qc_core::timeutil::now_ms;
use qc_storage::{JobRecord, SqliteStore, StoreError, resolve_db_path};

use executor::ExecutionResult;

const HEARTBEAT_INTERVAL_MS: i64 = 2_000;
const WAIT_TICK_MS: u64 = 50;

#[derive(Debug)]
struct WorkerConfig {
    db_path: PathBuf,
    worker_id: String,
    once: bool,
}

fn usage() -> &'static str {
    "qc_worker — queuectl worker process\n\n\
USAGE:\n\
  qc_worker [--db-path PATH] [--worker-id ID] [--once]\n\n\
NOTES:\n\
  - claims pending jobs from the queue database and executes them via `sh -c`.\n\
  - `--once` drains the queue and exits instead of polling forever.\n\
  - QUEUECTL_DB_PATH / QUEUECTL_WORKER_ID are honored as fallbacks.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(raw) = nix::unistd::gethostname() {
            if let Ok(name) = raw.into_string() {
                let trimmed = name.trim().to_string();
                if !trimmed.is_empty() {
                    return trimmed;
                }
            }
        }
    }
    "localhost".to_string()
}

fn default_worker_id() -> String {
    // Stable for the process lifetime, unique across restarts on one host.
    format!("{}#{}#{:x}", hostname(), std::process::id(), now_ms())
}

fn parse_args() -> Result<WorkerConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        std::process::exit(0);
    }

    let mut db_path: Option<PathBuf> = None;
    let mut worker_id: Option<String> = env_var("QUEUECTL_WORKER_ID");
    let mut once = false;

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--db-path" => {
                i += 1;
                let v = args.get(i).ok_or("--db-path requires PATH")?;
                db_path = Some(PathBuf::from(v));
            }
            "--worker-id" => {
                i += 1;
                let v = args.get(i).ok_or("--worker-id requires ID")?;
                worker_id = Some(v.to_string());
            }
            "--once" => once = true,
            other => return Err(format!("Unknown arg: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    Ok(WorkerConfig {
        db_path: resolve_db_path(db_path.as_deref()),
        worker_id: worker_id.unwrap_or_else(default_worker_id),
        once,
    })
}

/// Effective execution timeout: the job's own unless it is 0, then the
/// global; 0 means no timeout at all.
fn effective_timeout_s(job_timeout_s: i64, global_timeout_s: i64) -> i64 {
    if job_timeout_s > 0 {
        job_timeout_s
    } else {
        global_timeout_s.max(0)
    }
}

/// File-name-safe stem for a job's output capture files.
fn capture_stem(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}

fn is_lock_conflict(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::LostLock { .. } | StoreError::UnknownJob { .. }
    )
}

struct Worker {
    cfg: WorkerConfig,
    store: SqliteStore,
    shutdown: Arc<AtomicBool>,
    capture_dir: PathBuf,
    last_beat_ms: i64,
}

impl Worker {
    fn heartbeat_if_due(&mut self, now: i64) {
        if now.saturating_sub(self.last_beat_ms) >= HEARTBEAT_INTERVAL_MS {
            self.last_beat_ms = now;
            if let Err(err) = self.store.worker_heartbeat(&self.cfg.worker_id, now) {
                eprintln!("[{}] heartbeat failed: {err}", self.cfg.worker_id);
            }
        }
    }

    /// Poll/claim/execute until shutdown (or a drained queue with `--once`).
    /// Per-job errors are absorbed; only store-fatal conditions escape.
    fn run(&mut self) -> Result<(), StoreError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            let now = now_ms();
            self.heartbeat_if_due(now);
            self.store.sweep_expired_locks(now)?;

            match self.store.claim_next(&self.cfg.worker_id, now)? {
                Some(job) => self.process_job(&job)?,
                None => {
                    if self.cfg.once {
                        return Ok(());
                    }
                    let poll_ms = self
                        .store
                        .config_i64(ConfigKey::PollIntervalMs)?
                        .clamp(1, 60_000);
                    sleep(Duration::from_millis(poll_ms as u64));
                }
            }
        }
    }

    fn process_job(&mut self, job: &JobRecord) -> Result<(), StoreError> {
        eprintln!(
            "[{}] claimed {}: {}",
            self.cfg.worker_id, job.id, job.command
        );

        let global_timeout_s = self.store.config_i64(ConfigKey::JobTimeoutS)?;
        let timeout_s = effective_timeout_s(job.timeout_s, global_timeout_s);
        let lock_timeout_s = self.store.config_i64(ConfigKey::LockTimeoutS)?;
        let extend_every_ms = (lock_timeout_s.saturating_mul(1000) / 3).max(1_000);

        let mut running =
            match executor::spawn(&job.command, &self.capture_dir, &capture_stem(&job.id)) {
                Ok(running) => running,
                Err(err) => {
                    let result = ExecutionResult::launch_failed(&err);
                    return self.finalize(job, &result);
                }
            };

        let started = running.started_ms();
        let deadline_ms = if timeout_s > 0 {
            Some(started.saturating_add(timeout_s.saturating_mul(1000)))
        } else {
            None
        };
        let mut last_extend_ms = started;

        let (status, timed_out) = loop {
            match running.try_wait() {
                Ok(Some(status)) => break (Some(status), false),
                Ok(None) => {}
                Err(_) => {}
            }

            let now = now_ms();
            if deadline_ms.is_some_and(|d| now >= d) {
                let status = running.kill_tree();
                break (status, true);
            }

            if now.saturating_sub(last_extend_ms) >= extend_every_ms {
                last_extend_ms = now;
                match self.store.extend_lock(&job.id, &self.cfg.worker_id, now) {
                    Ok(_) => {}
                    Err(err) if is_lock_conflict(&err) => {
                        // The lease moved on; whatever this child produces
                        // belongs to nobody. Kill it and walk away.
                        eprintln!(
                            "[{}] lost lease on {} mid-run, discarding",
                            self.cfg.worker_id, job.id
                        );
                        running.kill_tree();
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
            }
            self.heartbeat_if_due(now);
            sleep(Duration::from_millis(WAIT_TICK_MS));
        };

        let result = running.into_result(status, timed_out, timeout_s);
        self.finalize(job, &result)
    }

    fn finalize(&mut self, job: &JobRecord, result: &ExecutionResult) -> Result<(), StoreError> {
        let now = now_ms();
        let finalized = if result.succeeded() {
            self.store
                .record_success(
                    &job.id,
                    &self.cfg.worker_id,
                    result.exit_code,
                    &result.stdout_tail,
                    &result.stderr_tail,
                    result.duration_ms,
                    now,
                )
                .map(|()| "completed".to_string())
        } else {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| result.outcome.as_str().to_string());
            self.store
                .record_failure(
                    &job.id,
                    &self.cfg.worker_id,
                    result.exit_code,
                    &result.stdout_tail,
                    &result.stderr_tail,
                    &error,
                    result.duration_ms,
                    now,
                )
                .map(|state| state.as_str().to_string())
        };

        match finalized {
            Ok(next_state) => {
                eprintln!(
                    "[{}] {} -> {} (exit={}, {}ms)",
                    self.cfg.worker_id, job.id, next_state, result.exit_code, result.duration_ms
                );
                Ok(())
            }
            Err(err) if is_lock_conflict(&err) => {
                eprintln!(
                    "[{}] lost lease on {}, outcome discarded",
                    self.cfg.worker_id, job.id
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn main() {
    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            eprintln!("failed to install signal handler: {err}");
            std::process::exit(1);
        }
    }

    let mut store = match SqliteStore::open(&cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("cannot open queue database {}: {err}", cfg.db_path.display());
            std::process::exit(1);
        }
    };

    let pid = std::process::id() as i64;
    if let Err(err) = store.register_worker(&cfg.worker_id, pid, now_ms()) {
        eprintln!("worker registration failed: {err}");
        std::process::exit(1);
    }
    eprintln!("[{}] worker started (pid {pid})", cfg.worker_id);

    let capture_dir = std::env::temp_dir().join(format!("qc_worker_{}", std::process::id()));
    let worker_id = cfg.worker_id.clone();
    let mut worker = Worker {
        cfg,
        store,
        shutdown,
        capture_dir: capture_dir.clone(),
        last_beat_ms: 0,
    };

    let outcome = worker.run();

    if let Err(err) = worker.store.deregister_worker(&worker_id) {
        eprintln!("[{worker_id}] deregister failed: {err}");
    }
    let _ = std::fs::remove_dir_all(&capture_dir);

    match outcome {
        Ok(()) => {
            eprintln!("[{worker_id}] worker stopped");
        }
        Err(err) => {
            eprintln!("[{worker_id}] fatal store error: {err}");
            std::process::exit(1);
        }
    }
}
