//! Job model and its status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::error::JobError;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Initial state; eligible for claiming and announced on the wake channel
    #[default]
    Pending,
    /// A consumer has acknowledged intent to run the job
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// ```text
    /// PENDING ─► QUEUED ─► RUNNING ─► SUCCEEDED
    ///    │                   ▲  │
    ///    └───────────────────┘  └──► FAILED ─► PENDING (retry)
    /// ```
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Running)
                | (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Pending)
        )
    }

    /// Entering this status publishes a wake signal.
    pub fn is_eligible(&self) -> bool {
        matches!(self, JobStatus::Pending)
    }

    pub fn validate_transition(&self, next: JobStatus) -> Result<(), JobError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub description: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl Job {
    /// Whether the job accepts no further transitions under the given retry bound.
    pub fn is_terminal(&self, max_attempts: i32) -> bool {
        match self.status {
            JobStatus::Succeeded => true,
            JobStatus::Failed => self.attempts >= max_attempts,
            _ => false,
        }
    }

    /// Apply an edge in memory, with the same stamping rules the store uses.
    ///
    /// `enqueued_at` and `started_at` are set at most once, `attempts` grows on
    /// every entry into RUNNING and `updated_at` never falls behind `created_at`.
    pub fn apply(&mut self, to: JobStatus, fields: &AdvanceFields, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now.max(self.created_at);
        match to {
            JobStatus::Queued => {
                self.enqueued_at.get_or_insert(now);
            }
            JobStatus::Running => {
                self.started_at.get_or_insert(now);
                self.attempts += 1;
            }
            _ => {}
        }
        if let Some(error) = &fields.last_error {
            self.last_error = Some(error.clone());
        }
    }
}

/// Extra columns written alongside a status advance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceFields {
    pub last_error: Option<String>,
}

impl AdvanceFields {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
        }
    }
}

/// Reject absent or blank descriptions before anything touches the store.
pub fn validate_description(description: Option<&str>) -> Result<&str, JobError> {
    match description {
        Some(d) if !d.trim().is_empty() => Ok(d),
        _ => Err(JobError::Validation("Description is required".to_string())),
    }
}
