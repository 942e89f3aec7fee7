#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use qc_core::timeutil::now_ms;
use qc_storage::{SqliteStore, StoreError};

#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;

const PID_FILE_NAME: &str = "workers.pid";
const LOGS_DIRNAME: &str = "logs";
const WORKER_BIN_ENV: &str = "QUEUECTL_WORKER_BIN";
const STALE_REGISTRY_MS: i64 = 60_000;
const LIVE_HEARTBEAT_MS: i64 = 10_000;
pub const STOP_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SupervisorError {
    Io(std::io::Error),
    Store(StoreError),
    AlreadyRunning { live: usize },
    SpawnFailed { bin: PathBuf, cause: String },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::AlreadyRunning { live } => {
                write!(f, "workers already running ({live} active); run `worker stop` first")
            }
            Self::SpawnFailed { bin, cause } => {
                write!(f, "failed to spawn worker ({}): {cause}", bin.display())
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<std::io::Error> for SupervisorError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for SupervisorError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// One pid-file line: the worker process and the id it registered under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerProc {
    pub pid: u32,
    pub worker_id: String,
}

pub struct Supervisor {
    db_path: PathBuf,
    pid_file: PathBuf,
    logs_dir: PathBuf,
}

/// Prefer a `qc_worker` sitting next to this binary so `./target/debug/queuectl`
/// works without PATH setup; fall back to PATH lookup.
fn default_worker_bin() -> PathBuf {
    if let Some(explicit) = std::env::var_os(WORKER_BIN_ENV) {
        return PathBuf::from(explicit);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("qc_worker");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("qc_worker")
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate_process(pid: u32, force: bool) {
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let _ = kill(Pid::from_raw(pid as i32), signal);
}

#[cfg(not(unix))]
fn terminate_process(_pid: u32, _force: bool) {}

impl Supervisor {
    pub fn new(db_path: &Path) -> Self {
        let dir = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            db_path: db_path.to_path_buf(),
            pid_file: dir.join(PID_FILE_NAME),
            logs_dir: dir.join(LOGS_DIRNAME),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Spawn `count` worker processes and record them in the pid map.
    /// Refuses when a previous pool is still alive.
    pub fn start(&self, count: usize) -> Result<Vec<WorkerProc>, SupervisorError> {
        let now = now_ms();
        let mut store = SqliteStore::open(&self.db_path)?;
        let purged = store.cleanup_stale_workers(now, STALE_REGISTRY_MS)?;
        if purged > 0 {
            eprintln!("cleaned up {purged} stale worker entries");
        }

        let live_pids: Vec<WorkerProc> = self
            .load_pid_map()
            .into_iter()
            .filter(|w| process_alive(w.pid))
            .collect();
        if !live_pids.is_empty() {
            return Err(SupervisorError::AlreadyRunning {
                live: live_pids.len(),
            });
        }
        let registered = store.live_workers(now, LIVE_HEARTBEAT_MS)?;
        if !registered.is_empty() {
            return Err(SupervisorError::AlreadyRunning {
                live: registered.len(),
            });
        }

        std::fs::create_dir_all(&self.logs_dir)?;
        let bin = default_worker_bin();
        let supervisor_pid = std::process::id();

        let mut spawned = Vec::with_capacity(count);
        for n in 1..=count {
            let worker_id = format!("worker-{n}-{supervisor_pid}");
            let log_path = self.logs_dir.join(format!("{worker_id}.log"));
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;

            let child = Command::new(&bin)
                .arg("--db-path")
                .arg(&self.db_path)
                .arg("--worker-id")
                .arg(&worker_id)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::from(log))
                .spawn()
                .map_err(|err| SupervisorError::SpawnFailed {
                    bin: bin.clone(),
                    cause: err.to_string(),
                })?;

            spawned.push(WorkerProc {
                pid: child.id(),
                worker_id,
            });
            // The Child handle is dropped on purpose: workers outlive this
            // short-lived supervisor process.
        }

        self.save_pid_map(&spawned)?;
        Ok(spawned)
    }

    /// Signal every recorded worker to drain, wait up to `grace`, force-kill
    /// stragglers, then clear the pid map and registry rows. Returns how
    /// many processes were signalled.
    pub fn stop(&self, grace: Duration) -> Result<usize, SupervisorError> {
        let workers = self.load_pid_map();
        if workers.is_empty() {
            return Ok(0);
        }

        let mut signalled = 0usize;
        for worker in &workers {
            if process_alive(worker.pid) {
                terminate_process(worker.pid, false);
                signalled += 1;
            }
        }

        let deadline = Instant::now() + grace;
        let mut remaining: Vec<&WorkerProc> =
            workers.iter().filter(|w| process_alive(w.pid)).collect();
        while !remaining.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(500));
            remaining.retain(|w| process_alive(w.pid));
        }
        for worker in &remaining {
            eprintln!("worker pid {} did not drain, killing", worker.pid);
            terminate_process(worker.pid, true);
        }

        // A SIGKILLed worker never deregisters itself; clean its row here.
        let mut store = SqliteStore::open(&self.db_path)?;
        for worker in &workers {
            let _ = store.deregister_worker(&worker.worker_id);
        }

        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)?;
        }
        Ok(signalled)
    }

    /// Pids from the map file that still point at live processes.
    pub fn running_pids(&self) -> Vec<u32> {
        self.load_pid_map()
            .into_iter()
            .map(|w| w.pid)
            .filter(|pid| process_alive(*pid))
            .collect()
    }

    pub fn load_pid_map(&self) -> Vec<WorkerProc> {
        let Ok(text) = std::fs::read_to_string(&self.pid_file) else {
            return Vec::new();
        };
        parse_pid_map(&text)
    }

    fn save_pid_map(&self, workers: &[WorkerProc]) -> Result<(), SupervisorError> {
        use std::io::Write;

        let tmp_path = self.pid_file.with_extension("pid.tmp");
        let mut file = File::create(&tmp_path)?;
        for worker in workers {
            writeln!(file, "{} {}", worker.pid, worker.worker_id)?;
        }
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.pid_file)?;
        Ok(())
    }
}

/// One line per worker: `<pid> <worker_id>`. Unparseable lines are skipped.
pub fn parse_pid_map(text: &str) -> Vec<WorkerProc> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(2, ' ');
            let pid = parts.next()?.parse::<u32>().ok()?;
            let worker_id = parts.next()?.trim();
            if worker_id.is_empty() {
                return None;
            }
            Some(WorkerProc {
                pid,
                worker_id: worker_id.to_string(),
            })
        })
        .collect()
}
