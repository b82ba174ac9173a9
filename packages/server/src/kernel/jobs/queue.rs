//! Transactional enqueue.
//!
//! A job is inserted and committed in one transaction; it is never partially
//! visible. The insert trigger queues the wake signal, which Postgres only
//! delivers once the commit succeeds.

use sqlx::PgPool;
use tracing::{error, info, warn};

use super::error::JobError;
use super::job::{validate_description, Job};

/// Create a job in PENDING and commit it.
///
/// The pooled connection is held by the transaction and returned to the pool
/// on every exit path, including rollback.
pub async fn enqueue(pool: &PgPool, description: Option<&str>) -> Result<Job, JobError> {
    let description = validate_description(description)?;

    let mut tx = pool.begin().await.map_err(|e| {
        error!(error = %e, "failed to begin enqueue transaction");
        JobError::from(e)
    })?;

    let inserted = sqlx::query_as::<_, Job>(
        r#"
        INSERT INTO jobs (description)
        VALUES ($1)
        RETURNING id, description, status, created_at, updated_at,
                  enqueued_at, started_at, attempts, last_error
        "#,
    )
    .bind(description)
    .fetch_one(&mut *tx)
    .await;

    let job = match inserted {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "job insert failed");
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed insert also failed");
            }
            return Err(e.into());
        }
    };

    if let Err(e) = tx.commit().await {
        error!(error = %e, "failed to commit enqueued job");
        return Err(e.into());
    }

    info!(job_id = job.id, "job enqueued");
    Ok(job)
}
