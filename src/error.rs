use core::time::Duration;

use thiserror::Error;

/// Failure of a background task.
///
/// Index, window and pool operations never fail; they clamp or no-op instead.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The caller stopped waiting. The worker may still finish; its response is discarded.
    #[error("task {id} timed out after {timeout:?}")]
    Timeout { id: u64, timeout: Duration },
    /// The worker thread died while the task was pending.
    #[error("worker crashed while task {id} was pending")]
    WorkerCrashed { id: u64 },
    /// The executor was destroyed while the task was pending.
    #[error("executor shut down before task {id} completed")]
    Shutdown { id: u64 },
    #[error("expected {expected} output, got {found}")]
    UnexpectedOutput {
        expected: &'static str,
        found: &'static str,
    },
}

impl TaskError {
    /// Whether retrying the same call can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WorkerCrashed { .. })
    }

    pub fn task_id(&self) -> Option<u64> {
        match self {
            Self::Timeout { id, .. } | Self::WorkerCrashed { id } | Self::Shutdown { id } => {
                Some(*id)
            }
            Self::UnexpectedOutput { .. } => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, TaskError>;
