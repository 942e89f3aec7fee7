#![forbid(unsafe_code)]

mod commands;
mod render;
mod supervisor;

use qc_core::payload::PayloadError;
use qc_storage::StoreError;
use supervisor::SupervisorError;

fn usage() -> &'static str {
    "queuectl — durable background job queue for shell commands\n\n\
USAGE:\n\
  queuectl [--db-path PATH] <command> [args]\n\n\
COMMANDS:\n\
  init                                  create the queue database and defaults\n\
  enqueue [JSON] [--file PATH]          enqueue one job or an array of jobs\n\
  list [--state S] [--limit N] [--pending-ready-only] [--json]\n\
  status [--json]                       queue counts, workers, and metrics\n\
  logs <id>                             show a job's captured output\n\
  worker start [--count N]              spawn N worker processes\n\
  worker stop                           drain and stop the worker pool\n\
  dlq list [--limit N] [--json]         list dead-letter jobs\n\
  dlq retry <id>                        re-queue a dead-letter job\n\
  config get [KEY]                      print one tunable (or all)\n\
  config set <KEY> <VALUE>              update a tunable\n\n\
NOTES:\n\
  - QUEUECTL_DB_PATH overrides the default database location (~/.queuectl/queue.db).\n\
  - exit codes: 0 ok, 1 failure/conflict, 2 invalid input.\n"
}

/// CLI failure split along the exit-code boundary: invalid input exits 2,
/// everything else exits 1.
#[derive(Debug)]
pub(crate) enum CliError {
    Input(String),
    Failure(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Input(_) => 2,
            CliError::Failure(_) => 1,
        }
    }

    fn message(&self) -> &str {
        match self {
            CliError::Input(message) | CliError::Failure(message) => message,
        }
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InvalidInput(_) | StoreError::InvalidConfigValue(_) => {
                CliError::Input(value.to_string())
            }
            _ => CliError::Failure(value.to_string()),
        }
    }
}

impl From<PayloadError> for CliError {
    fn from(value: PayloadError) -> Self {
        CliError::Input(value.to_string())
    }
}

impl From<SupervisorError> for CliError {
    fn from(value: SupervisorError) -> Self {
        CliError::Failure(value.to_string())
    }
}

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "-h" || a == "--help") || args.is_empty() {
        print!("{}", usage());
        std::process::exit(if args.is_empty() { 2 } else { 0 });
    }

    // --db-path is accepted anywhere on the line; strip it before dispatch.
    let mut db_path_flag: Option<std::path::PathBuf> = None;
    if let Some(idx) = args.iter().position(|a| a == "--db-path") {
        if idx + 1 >= args.len() {
            eprintln!("error: --db-path requires PATH");
            std::process::exit(2);
        }
        db_path_flag = Some(std::path::PathBuf::from(&args[idx + 1]));
        args.drain(idx..=idx + 1);
    }
    let db_path = qc_storage::resolve_db_path(db_path_flag.as_deref());

    let Some(command) = args.first().cloned() else {
        print!("{}", usage());
        std::process::exit(2);
    };
    let rest = &args[1..];

    let outcome = match command.as_str() {
        "init" => commands::init(&db_path, rest),
        "enqueue" => commands::enqueue(&db_path, rest),
        "list" => commands::list(&db_path, rest),
        "status" => commands::status(&db_path, rest),
        "logs" => commands::logs(&db_path, rest),
        "worker" => commands::worker(&db_path, rest),
        "dlq" => commands::dlq(&db_path, rest),
        "config" => commands::config(&db_path, rest),
        other => {
            eprintln!("error: unknown command: {other}\n\n{}", usage());
            std::process::exit(2);
        }
    };

    match outcome {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {}", err.message());
            std::process::exit(err.exit_code());
        }
    }
}
