//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Used when the retention reaper runs in-process instead of through pg_cron.
//!
//! ```text
//! Scheduler (REAPER_SCHEDULE, default hourly)
//!     │
//!     └─► reap_succeeded(retention, batch_size)
//!             └─► DELETE succeeded jobs older than retention, batch by batch
//! ```

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::ReaperConfig;
use crate::kernel::jobs::reaper::{reap_succeeded, REAPER_SCHEDULE_NAME};

/// Owns the scheduler and the single reaper job registered on it.
pub struct InProcessReaper {
    scheduler: JobScheduler,
    job_id: Option<Uuid>,
}

impl InProcessReaper {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            job_id: None,
        })
    }

    /// Register (or re-register) the reaper. Any previous registration is
    /// removed first so two schedules never run side by side.
    pub async fn register(&mut self, pool: PgPool, config: &ReaperConfig) -> Result<Uuid> {
        if let Some(previous) = self.job_id.take() {
            self.scheduler.remove(&previous).await?;
            tracing::debug!(job = %previous, "removed previous reaper schedule");
        }

        let expression = to_scheduler_expression(&config.schedule)?;
        let retention = config.retention.clone();
        let batch_size = config.batch_size;

        let reap_job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let pool = pool.clone();
            let retention = retention.clone();
            Box::pin(async move {
                if let Err(e) = reap_succeeded(&pool, &retention, batch_size).await {
                    tracing::error!(error = %e, "{} task failed", REAPER_SCHEDULE_NAME);
                }
            })
        })?;

        let job_id = self.scheduler.add(reap_job).await?;
        self.job_id = Some(job_id);

        tracing::info!(
            schedule = %config.schedule,
            retention = %config.retention,
            "retention reaper scheduled in-process"
        );
        Ok(job_id)
    }

    pub fn job_id(&self) -> Option<Uuid> {
        self.job_id
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            tracing::warn!(error = %e, "reaper scheduler shutdown failed");
        }
    }
}

/// tokio-cron-scheduler expects a leading seconds field; pg_cron style
/// five-field expressions fire at second zero.
pub fn to_scheduler_expression(schedule: &str) -> Result<String> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(anyhow!(
            "cron expression '{}' has {} fields, expected 5",
            schedule,
            n
        )),
    }
}
