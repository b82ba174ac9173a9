//! Retention reaper.
//!
//! Deletes SUCCEEDED jobs whose `created_at` is older than the retention
//! window, in bounded batches that skip locked rows, so it never holds locks
//! that stall enqueue or advance traffic. Running it twice, or twice at once,
//! is harmless: the second pass finds nothing to delete.
//!
//! Scheduling is optional. With the `pg_cron` backend the sweep is registered
//! inside Postgres; with `in_process` it runs on a tokio-cron-scheduler owned
//! by the server. Registration failures are logged and the system keeps
//! serving without automatic cleanup.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use super::error::JobError;
use crate::config::{ReaperBackend, ReaperConfig};
use crate::kernel::scheduled_tasks::InProcessReaper;

/// Name the sweep is registered under, in both backends.
pub const REAPER_SCHEDULE_NAME: &str = "reap-succeeded-jobs";

/// Run one full sweep. Returns the number of rows removed.
pub async fn reap_succeeded(
    pool: &PgPool,
    retention: &str,
    batch_size: i32,
) -> Result<u64, JobError> {
    let batch_size = batch_size.max(1);
    let mut removed = 0u64;

    loop {
        let batch = sqlx::query_scalar::<_, i64>(
            "SELECT reap_succeeded_jobs($1::interval, $2)",
        )
        .bind(retention)
        .bind(batch_size)
        .fetch_one(pool)
        .await?;

        removed += batch.max(0) as u64;
        if batch < i64::from(batch_size) {
            break;
        }
    }

    info!(removed, retention, "reaped succeeded jobs");
    Ok(removed)
}

/// What ended up running the reaper.
pub enum ReaperHandle {
    PgCron { cron_job_id: i64 },
    InProcess(InProcessReaper),
    Disabled,
}

impl ReaperHandle {
    pub fn is_active(&self) -> bool {
        !matches!(self, ReaperHandle::Disabled)
    }

    /// Stop an in-process schedule. A pg_cron schedule outlives the process.
    pub async fn shutdown(self) {
        if let ReaperHandle::InProcess(reaper) = self {
            reaper.shutdown().await;
        }
    }
}

/// Register the reaper according to `config`. Never fails: any problem is
/// logged and [`ReaperHandle::Disabled`] is returned.
pub async fn start(pool: &PgPool, config: &ReaperConfig) -> ReaperHandle {
    if !config.enabled {
        info!("retention reaper disabled");
        return ReaperHandle::Disabled;
    }

    match register(pool, config).await {
        Ok(handle) => handle,
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(
                error = %reason,
                backend = ?config.backend,
                "retention reaper not scheduled; continuing without automatic cleanup"
            );
            ReaperHandle::Disabled
        }
    }
}

async fn register(pool: &PgPool, config: &ReaperConfig) -> Result<ReaperHandle> {
    validate_retention(pool, &config.retention).await?;

    match config.backend {
        ReaperBackend::PgCron => {
            let cron_job_id = register_pg_cron(pool, config).await?;
            Ok(ReaperHandle::PgCron { cron_job_id })
        }
        ReaperBackend::InProcess => {
            let mut reaper = InProcessReaper::new().await?;
            reaper.register(pool.clone(), config).await?;
            reaper.start().await?;
            Ok(ReaperHandle::InProcess(reaper))
        }
    }
}

/// Let Postgres judge the interval literal before anything is scheduled.
pub async fn validate_retention(pool: &PgPool, retention: &str) -> Result<()> {
    sqlx::query("SELECT $1::text::interval")
        .bind(retention)
        .execute(pool)
        .await
        .with_context(|| format!("invalid retention interval '{}'", retention))?;
    Ok(())
}

/// Replace any existing pg_cron job of the same name with a fresh one.
pub async fn register_pg_cron(pool: &PgPool, config: &ReaperConfig) -> Result<i64> {
    ensure_pg_cron(pool).await?;

    let removed = unschedule_pg_cron(pool).await?;

    let cron_job_id = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT cron.schedule(
            $1,
            $2,
            format('CALL reap_succeeded_jobs_all(%L::interval, %s)', $3::text, $4::integer)
        )
        "#,
    )
    .bind(REAPER_SCHEDULE_NAME)
    .bind(&config.schedule)
    .bind(&config.retention)
    .bind(config.batch_size.max(1))
    .fetch_one(pool)
    .await
    .with_context(|| format!("cron.schedule rejected '{}'", config.schedule))?;

    info!(
        cron_job_id,
        replaced = removed,
        schedule = %config.schedule,
        retention = %config.retention,
        "retention reaper scheduled with pg_cron"
    );
    Ok(cron_job_id)
}

/// Remove every pg_cron job registered under [`REAPER_SCHEDULE_NAME`].
pub async fn unschedule_pg_cron(pool: &PgPool) -> Result<usize> {
    let removed = sqlx::query_scalar::<_, bool>(
        "SELECT cron.unschedule(jobid) FROM cron.job WHERE jobname = $1",
    )
    .bind(REAPER_SCHEDULE_NAME)
    .fetch_all(pool)
    .await
    .context("failed to unschedule existing reaper")?;

    Ok(removed.into_iter().filter(|ok| *ok).count())
}

async fn ensure_pg_cron(pool: &PgPool) -> Result<()> {
    let installed = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_cron')",
    )
    .fetch_one(pool)
    .await?;

    if !installed {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_cron")
            .execute(pool)
            .await
            .context("pg_cron extension is unavailable")?;
    }

    Ok(())
}
