use thiserror::Error;

use super::job::JobStatus;

/// Failures surfaced by the job store.
#[derive(Error, Debug)]
pub enum JobError {
    /// Rejected before any write.
    #[error("{0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(i64),

    /// The row moved on before our conditional update landed. Callers re-scan.
    #[error("job {id} is {actual}, expected {expected}")]
    Conflict {
        id: i64,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("transition {from} -> {to} is not permitted")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// FAILED with no retry left; the job is terminal.
    #[error("job {id} has used all of its attempts ({attempts})")]
    RetriesExhausted { id: i64, attempts: i32 },

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl JobError {
    /// Expected outcomes under normal traffic, as opposed to faults.
    pub fn is_expected(&self) -> bool {
        !matches!(self, JobError::Storage(_))
    }
}
