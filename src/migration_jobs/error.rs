use thiserror::Error;

/// Errors raised by the scheduler and execution engine.
///
/// Per-item problems never surface here; they are folded into the
/// execution result instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, SchedulerError::AlreadyRunning(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedulerError::NotFound(_))
    }
}
