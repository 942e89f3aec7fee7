#![forbid(unsafe_code)]

use qc_core::config::ConfigValueError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    DuplicateId {
        job_id: String,
    },
    UnknownJob {
        job_id: String,
    },
    /// The caller tried to finalize or extend a job whose lease it no longer
    /// holds; the computed outcome must be discarded.
    LostLock {
        job_id: String,
        worker_id: String,
    },
    NotDead {
        job_id: String,
        state: String,
    },
    InvalidConfigValue(ConfigValueError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::DuplicateId { job_id } => write!(f, "job already exists: {job_id}"),
            Self::UnknownJob { job_id } => write!(f, "job not found: {job_id}"),
            Self::LostLock { job_id, worker_id } => {
                write!(f, "lock on {job_id} no longer held by {worker_id}")
            }
            Self::NotDead { job_id, state } => {
                write!(f, "job {job_id} is not in the dead-letter queue (state={state})")
            }
            Self::InvalidConfigValue(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<ConfigValueError> for StoreError {
    fn from(value: ConfigValueError) -> Self {
        Self::InvalidConfigValue(value)
    }
}
