//! Row-level helpers for arranging job state directly in the database.

use jobs_core::kernel::jobs::{AdvanceFields, Job, JobStatus, JobStore, PostgresJobStore};
use sqlx::PgPool;

/// Shift a job's timestamps into the past. `created_at` and `updated_at`
/// move together so their ordering constraint still holds.
pub async fn age_job(pool: &PgPool, id: i64, by: &str) {
    sqlx::query(
        r#"
        UPDATE jobs
        SET created_at = created_at - $2::interval,
            updated_at = updated_at - $2::interval
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(by)
    .execute(pool)
    .await
    .expect("Failed to age job");
}

pub async fn count_jobs(pool: &PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
        .fetch_one(pool)
        .await
        .expect("Failed to count jobs")
}

/// Enqueue a job and walk it PENDING -> RUNNING -> SUCCEEDED.
pub async fn succeeded_job(store: &PostgresJobStore, description: &str) -> Job {
    let job = running_job(store, description).await;
    store.complete(job.id).await.expect("Failed to complete job")
}

/// Enqueue a job and move it straight to RUNNING.
pub async fn running_job(store: &PostgresJobStore, description: &str) -> Job {
    let job = store
        .enqueue(Some(description))
        .await
        .expect("Failed to enqueue job");
    store
        .advance(
            job.id,
            JobStatus::Pending,
            JobStatus::Running,
            AdvanceFields::default(),
        )
        .await
        .expect("Failed to start job")
}
