#![forbid(unsafe_code)]

use crate::backend::{BackendState, JobExit};

/// The stable status vocabulary reported to callers and persisted in the durable store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Unknown,
    Queued,
    Inflight,
    Waiting,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Inflight => "INFLIGHT",
            Self::Waiting => "WAITING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Parses a stored label. Anything unrecognised reads back as `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "QUEUED" => Self::Queued,
            "INFLIGHT" => Self::Inflight,
            "WAITING" => Self::Waiting,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Collapses an instantaneous backend state. Hold and suspend reasons do not produce
    /// distinct labels.
    pub fn from_backend_state(state: BackendState) -> Self {
        match state {
            BackendState::Queued(_) => Self::Queued,
            BackendState::Running => Self::Inflight,
            BackendState::Suspended(_) => Self::Waiting,
            BackendState::Done => Self::Succeeded,
            BackendState::Failed => Self::Failed,
            BackendState::Unknown => Self::Unknown,
        }
    }

    /// Classifies a finished job: only a normal exit with code 0 succeeds.
    pub fn from_exit(exit: &JobExit) -> Self {
        if exit.exited && exit.exit_code == 0 {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
