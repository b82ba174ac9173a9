//! Durable job store.
//!
//! Status changes are always conditional updates against the expected prior
//! status, executed in a single statement so two consumers racing for the same
//! row cannot both win. The loser gets [`JobError::Conflict`] and re-scans.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use super::error::JobError;
use super::job::{AdvanceFields, Job, JobStatus};
use super::queue;
use super::stats::{JobCounters, JobStats};

/// Store operations shared by every backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in PENDING. Absent or blank descriptions fail with
    /// [`JobError::Validation`] and nothing is written.
    async fn enqueue(&self, description: Option<&str>) -> Result<Job, JobError>;

    /// Current committed row, never cached.
    async fn find_by_id(&self, id: i64) -> Result<Job, JobError>;

    /// Move `id` from `from` to `to` if, and only if, it is still in `from`.
    ///
    /// Only the edge graph is checked here. The retry bound is a consumer
    /// policy: FAILED -> PENDING through `advance` succeeds whatever
    /// `attempts` is. Use [`PostgresJobStore::retry`] or
    /// [`PostgresJobStore::resubmit_failed`] to respect `max_attempts`.
    async fn advance(
        &self,
        id: i64,
        from: JobStatus,
        to: JobStatus,
        fields: AdvanceFields,
    ) -> Result<Job, JobError>;

    /// Cheap liveness check for the health route.
    async fn ping(&self) -> Result<(), JobError>;

    /// Outcome counters recorded through this handle.
    fn stats(&self) -> JobStats;
}

/// PostgreSQL-backed job store.
///
/// Clones share the pool and the outcome counters.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    counters: Arc<JobCounters>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            counters: Arc::new(JobCounters::new()),
        }
    }

    pub fn counters(&self) -> &JobCounters {
        &self.counters
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Claim the oldest PENDING or QUEUED job into RUNNING.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent consumers never block on
    /// each other or take the same row.
    pub async fn claim_next(&self) -> Result<Option<Job>, JobError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status IN ('PENDING', 'QUEUED')
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'RUNNING',
                started_at = COALESCE(started_at, NOW()),
                attempts = attempts + 1,
                updated_at = GREATEST(NOW(), created_at)
            WHERE id IN (SELECT id FROM next_job)
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = &job {
            debug!(job_id = job.id, attempts = job.attempts, "claimed job");
        }

        Ok(job)
    }

    /// Acknowledge up to `limit` PENDING jobs as QUEUED.
    pub async fn queue_pending(&self, limit: i64) -> Result<Vec<Job>, JobError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH batch AS (
                SELECT id
                FROM jobs
                WHERE status = 'PENDING'
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'QUEUED',
                enqueued_at = COALESCE(enqueued_at, NOW()),
                updated_at = GREATEST(NOW(), created_at)
            WHERE id IN (SELECT id FROM batch)
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// RUNNING -> SUCCEEDED.
    pub async fn complete(&self, id: i64) -> Result<Job, JobError> {
        self.advance(
            id,
            JobStatus::Running,
            JobStatus::Succeeded,
            AdvanceFields::default(),
        )
        .await
    }

    /// RUNNING -> FAILED, recording the error.
    pub async fn fail(&self, id: i64, error: &str) -> Result<Job, JobError> {
        self.advance(
            id,
            JobStatus::Running,
            JobStatus::Failed,
            AdvanceFields::with_error(error),
        )
        .await
    }

    /// Fail RUNNING jobs nobody has touched within `running_timeout`
    /// (a Postgres interval literal such as `"5 minutes"`).
    pub async fn reclaim_stuck(
        &self,
        running_timeout: &str,
        limit: i64,
    ) -> Result<Vec<Job>, JobError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH stuck AS (
                SELECT id
                FROM jobs
                WHERE status = 'RUNNING'
                  AND updated_at < NOW() - $1::interval
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'FAILED',
                last_error = 'execution timed out',
                updated_at = GREATEST(NOW(), created_at)
            WHERE id IN (SELECT id FROM stuck)
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .bind(running_timeout)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        for job in &jobs {
            warn!(job_id = job.id, attempts = job.attempts, "reclaimed stuck job");
        }

        Ok(jobs)
    }

    /// FAILED -> PENDING for one job, only while `attempts < max_attempts`.
    pub async fn retry(&self, id: i64, max_attempts: i32) -> Result<Job, JobError> {
        let retried = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'PENDING',
                updated_at = GREATEST(NOW(), created_at)
            WHERE id = $1 AND status = 'FAILED' AND attempts < $2
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = retried {
            info!(job_id = id, attempts = job.attempts, "retried failed job");
            return Ok(job);
        }

        let current = self.find_by_id(id).await?;
        if current.status != JobStatus::Failed {
            return Err(JobError::Conflict {
                id,
                expected: JobStatus::Failed,
                actual: current.status,
            });
        }

        Err(JobError::RetriesExhausted {
            id,
            attempts: current.attempts,
        })
    }

    /// Resubmit FAILED jobs that still have attempts left (FAILED -> PENDING).
    ///
    /// Each resubmission fires the wake signal through the status trigger.
    pub async fn resubmit_failed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Job>, JobError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH retryable AS (
                SELECT id
                FROM jobs
                WHERE status = 'FAILED'
                  AND attempts < $1
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'PENDING',
                updated_at = GREATEST(NOW(), created_at)
            WHERE id IN (SELECT id FROM retryable)
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        for job in &jobs {
            info!(job_id = job.id, attempts = job.attempts, "resubmitted failed job");
        }

        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, description: Option<&str>) -> Result<Job, JobError> {
        let result = queue::enqueue(&self.pool, description).await;
        self.counters.record_enqueue(&result);
        result
    }

    async fn find_by_id(&self, id: i64) -> Result<Job, JobError> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, description, status, created_at, updated_at,
                   enqueued_at, started_at, attempts, last_error
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(JobError::NotFound(id))
    }

    async fn advance(
        &self,
        id: i64,
        from: JobStatus,
        to: JobStatus,
        fields: AdvanceFields,
    ) -> Result<Job, JobError> {
        from.validate_transition(to)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = $3,
                enqueued_at = CASE
                    WHEN $3 = 'QUEUED'::job_status THEN COALESCE(enqueued_at, NOW())
                    ELSE enqueued_at
                END,
                started_at = CASE
                    WHEN $3 = 'RUNNING'::job_status THEN COALESCE(started_at, NOW())
                    ELSE started_at
                END,
                attempts = CASE
                    WHEN $3 = 'RUNNING'::job_status THEN attempts + 1
                    ELSE attempts
                END,
                last_error = COALESCE($4, last_error),
                updated_at = GREATEST(NOW(), created_at)
            WHERE id = $1 AND status = $2
            RETURNING id, description, status, created_at, updated_at,
                      enqueued_at, started_at, attempts, last_error
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(fields.last_error)
        .fetch_optional(&mut *tx)
        .await?;

        let job = match updated {
            Some(job) => job,
            None => {
                let actual = sqlx::query_scalar::<_, JobStatus>(
                    "SELECT status FROM jobs WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

                // Nothing was written; dropping the transaction rolls it back.
                return Err(match actual {
                    None => JobError::NotFound(id),
                    Some(actual) => {
                        debug!(job_id = id, expected = %from, actual = %actual, "advance lost race");
                        JobError::Conflict {
                            id,
                            expected: from,
                            actual,
                        }
                    }
                });
            }
        };

        tx.commit().await?;

        debug!(job_id = id, from = %from, to = %to, "advanced job");
        Ok(job)
    }

    async fn ping(&self) -> Result<(), JobError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn stats(&self) -> JobStats {
        self.counters.snapshot()
    }
}
