//! Consumer processes for the job queue.
//!
//! [`JobWorker`] waits on the wake channel and drains eligible jobs; the wait
//! is bounded so a missed signal only delays work until the next
//! reconciling scan. [`JobPoller`] reclaims stuck RUNNING jobs and resubmits
//! failed ones that still have attempts left.
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► drain: claim_next() until empty
//!     │       ├─► JobHandler::execute(job)
//!     │       └─► complete(id) | fail(id, error)
//!     └─► JobWakeups::wait(wake_timeout)   (signal or timeout → drain again)
//!
//! JobPoller (every poll_interval)
//!     ├─► reclaim_stuck   RUNNING → FAILED
//!     └─► resubmit_failed FAILED  → PENDING   (fires wake signal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::JobError;
use super::job::{Job, JobStatus};
use super::job_store::{JobStore, PostgresJobStore};
use super::notifier::{JobWakeups, Wakeup};
use super::stats::JobStats;
use crate::config::WorkerSettings;

/// What a consumer does with a claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Longest wait for a wake signal before a reconciling scan
    pub wake_timeout: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            wake_timeout: Duration::from_secs(5),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl From<&WorkerSettings> for JobWorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            wake_timeout: settings.wake_timeout,
            ..Default::default()
        }
    }
}

pub struct JobWorker {
    store: PostgresJobStore,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(store: PostgresJobStore, handler: Arc<dyn JobHandler>) -> Self {
        Self::with_config(store, handler, JobWorkerConfig::default())
    }

    pub fn with_config(
        store: PostgresJobStore,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut wakeups = JobWakeups::subscribe(self.store.pool())
            .await
            .context("failed to subscribe to job wakeups")?;

        info!(worker_id = %self.config.worker_id, "job worker starting");

        loop {
            // Subscribed before the first drain, so nothing committed after
            // this point can slip past unannounced.
            self.drain(&shutdown).await;

            let wakeup = tokio::select! {
                _ = shutdown.cancelled() => break,
                wakeup = wakeups.wait(self.config.wake_timeout) => wakeup,
            };

            match wakeup {
                Wakeup::Signaled => debug!("woken by signal"),
                Wakeup::TimedOut => debug!("reconciling scan"),
                Wakeup::Interrupted => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    /// Claim and process jobs until none are eligible. Returns how many ran.
    pub async fn drain(&self, shutdown: &CancellationToken) -> usize {
        let mut processed = 0;

        while !shutdown.is_cancelled() {
            match self.store.claim_next().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    break;
                }
            }
        }

        processed
    }

    /// Outcome counters shared with the store handle this worker claims through.
    pub fn stats(&self) -> JobStats {
        self.store.stats()
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;
        info!(job_id, attempts = job.attempts, "processing job");

        let outcome = match self.handler.execute(&job).await {
            Ok(()) => self.store.complete(job_id).await,
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(job_id, error = %message, "job failed");
                self.store.fail(job_id, &message).await
            }
        };

        match outcome {
            Ok(job) => {
                match job.status {
                    JobStatus::Succeeded => self.store.counters().record_processed(),
                    _ => self.store.counters().record_failed(),
                }
                debug!(job_id, status = %job.status, "job finished");
            }
            // Usually a Conflict: the poller reclaimed the job while it ran.
            Err(e) if e.is_expected() => {
                warn!(job_id, error = %e, "job outcome not recorded");
            }
            Err(e) => error!(job_id, error = %e, "failed to record job outcome"),
        }
    }
}

/// Configuration for the poller.
#[derive(Debug, Clone)]
pub struct JobPollerConfig {
    pub interval: Duration,
    /// Postgres interval literal
    pub running_timeout: String,
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Default for JobPollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            running_timeout: "5 minutes".to_string(),
            max_attempts: 3,
            batch_size: 10,
        }
    }
}

impl From<&WorkerSettings> for JobPollerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            interval: settings.poll_interval,
            running_timeout: settings.running_timeout.clone(),
            max_attempts: settings.max_attempts,
            ..Default::default()
        }
    }
}

/// Counts from one poller pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub reclaimed: usize,
    pub resubmitted: usize,
}

pub struct JobPoller {
    store: PostgresJobStore,
    config: JobPollerConfig,
}

impl JobPoller {
    pub fn new(store: PostgresJobStore, config: JobPollerConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(interval = ?self.config.interval, "job poller starting");

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "poller pass failed");
                    }
                }
            }
        }

        info!("job poller stopped");
        Ok(())
    }

    /// One pass: fail stuck RUNNING jobs, then resubmit retryable failures.
    pub async fn tick(&self) -> Result<PollOutcome, JobError> {
        let reclaimed = self
            .store
            .reclaim_stuck(&self.config.running_timeout, self.config.batch_size)
            .await?
            .len();
        let resubmitted = self
            .store
            .resubmit_failed(self.config.max_attempts, self.config.batch_size)
            .await?
            .len();

        if reclaimed > 0 || resubmitted > 0 {
            info!(reclaimed, resubmitted, "poller pass complete");
        }

        Ok(PollOutcome {
            reclaimed,
            resubmitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerRole;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            role: WorkerRole::Poller,
            wake_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(30),
            max_attempts: 5,
            running_timeout: "10 minutes".to_string(),
        }
    }

    #[test]
    fn worker_config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.wake_timeout, Duration::from_secs(5));
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn worker_config_from_settings() {
        let config = JobWorkerConfig::from(&settings());
        assert_eq!(config.wake_timeout, Duration::from_secs(2));
    }

    #[test]
    fn poller_config_from_settings() {
        let config = JobPollerConfig::from(&settings());
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.running_timeout, "10 minutes");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.batch_size, 10);
    }
}
