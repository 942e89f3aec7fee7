#![forbid(unsafe_code)]

/// Lifecycle state of a job row.
///
/// Retryable failures reschedule the job back to `Pending`; `Failed` exists
/// as a filter/stats bucket but is never left at rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(raw: &str) -> Option<JobState> {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

/// How a single execution attempt ended, as reported by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    Exited,
    TimedOut,
    LaunchFailed,
}

impl ExecOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecOutcome::Exited => "exited",
            ExecOutcome::TimedOut => "timed_out",
            ExecOutcome::LaunchFailed => "launch_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_strings() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse(" PENDING "), Some(JobState::Pending));
        assert_eq!(JobState::parse("queued"), None);
    }

    #[test]
    fn terminal_states_are_completed_and_dead() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Dead.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Failed.is_terminal());
    }
}
