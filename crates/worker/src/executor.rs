#![forbid(unsafe_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use qc_core::model::ExecOutcome;
use qc_core::timeutil::now_ms;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

/// What one execution attempt produced. `error` carries the human-readable
/// cause for timeouts and launch failures; it becomes the job's
/// `last_error`.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub duration_ms: i64,
    pub outcome: ExecOutcome,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == ExecOutcome::Exited && self.exit_code == 0
    }

    pub fn launch_failed(err: &std::io::Error) -> Self {
        Self {
            exit_code: -1,
            stdout_tail: String::new(),
            stderr_tail: String::new(),
            duration_ms: 0,
            outcome: ExecOutcome::LaunchFailed,
            error: Some(format!("launch failed: {err}")),
        }
    }
}

/// A spawned job command. Output streams go to capture files rather than
/// pipes so the polling loop never deadlocks on a full pipe buffer.
pub struct RunningCommand {
    child: Child,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    started_ms: i64,
}

/// Spawn `command` under `sh -c` in its own process group so a timeout can
/// take down the whole tree.
pub fn spawn(
    command: &str,
    capture_dir: &Path,
    capture_stem: &str,
) -> Result<RunningCommand, std::io::Error> {
    std::fs::create_dir_all(capture_dir)?;
    let stdout_path = capture_dir.join(format!("{capture_stem}.stdout"));
    let stderr_path = capture_dir.join(format!("{capture_stem}.stderr"));
    let stdout_file = File::create(&stdout_path)?;
    let stderr_file = File::create(&stderr_path)?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    Ok(RunningCommand {
        child,
        stdout_path,
        stderr_path,
        started_ms: now_ms(),
    })
}

impl RunningCommand {
    pub fn started_ms(&self) -> i64 {
        self.started_ms
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, std::io::Error> {
        self.child.try_wait()
    }

    /// Kill the whole process group (the child is its own group leader),
    /// then reap it.
    pub fn kill_tree(&mut self) -> Option<ExitStatus> {
        kill_process_group(self.child.id());
        let _ = self.child.kill();
        self.child.wait().ok()
    }

    /// Fold the exit status and captured output into a result. `timed_out`
    /// marks an execution that was killed by the timeout deadline.
    pub fn into_result(self, status: Option<ExitStatus>, timed_out: bool, timeout_s: i64) -> ExecutionResult {
        let duration_ms = now_ms().saturating_sub(self.started_ms).max(0);
        let stdout_tail = read_tail(&self.stdout_path);
        let stderr_tail = read_tail(&self.stderr_path);
        let _ = std::fs::remove_file(&self.stdout_path);
        let _ = std::fs::remove_file(&self.stderr_path);

        if timed_out {
            return ExecutionResult {
                exit_code: -1,
                stdout_tail,
                stderr_tail,
                duration_ms,
                outcome: ExecOutcome::TimedOut,
                error: Some(format!("timed out after {timeout_s}s")),
            };
        }

        let exit_code = status.and_then(|s| s.code()).map(i64::from).unwrap_or(-1);
        let error = if exit_code == 0 {
            None
        } else {
            Some(match status {
                Some(s) if s.code().is_some() => format!("exit status {exit_code}"),
                _ => "terminated by signal".to_string(),
            })
        };
        ExecutionResult {
            exit_code,
            stdout_tail,
            stderr_tail,
            duration_ms,
            outcome: ExecOutcome::Exited,
            error,
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Last 8 KiB of a capture file, lossily decoded, UTF-8 safe.
pub fn read_tail(path: &Path) -> String {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };
    let text = String::from_utf8_lossy(&bytes);
    tail_chars(&text, OUTPUT_TAIL_BYTES).to_string()
}

/// Tail slice of at most `max_bytes`, starting on a char boundary.
pub fn tail_chars(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
