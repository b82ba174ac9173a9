//! Job consumer process
//!
//! Runs either the worker role (claims and executes eligible jobs) or the
//! poller role (reclaims stuck jobs and resubmits failed ones), selected by
//! `WORKER_ROLE`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobs_core::{
    kernel::{
        db,
        jobs::{
            Job, JobHandler, JobPoller, JobPollerConfig, JobStore, JobWorker, JobWorkerConfig,
        },
        jobs::PostgresJobStore,
    },
    Config, WorkerRole,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Records the job and succeeds. Real consumers plug in their own handler.
struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn execute(&self, job: &Job) -> Result<()> {
        tracing::info!(
            job_id = job.id,
            description = %job.description,
            "executing job"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobs_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let role = config.worker.role;
    tracing::info!(?role, "Starting job consumer");

    let pool = db::connect(&config.database).await?;
    let store = PostgresJobStore::new(pool.clone());
    let counters = store.clone();

    let shutdown = CancellationToken::new();
    let task = match role {
        WorkerRole::Worker => {
            let worker = JobWorker::with_config(
                store,
                Arc::new(LogHandler),
                JobWorkerConfig::from(&config.worker),
            );
            tokio::spawn(worker.run(shutdown.clone()))
        }
        WorkerRole::Poller => {
            let poller = JobPoller::new(store, JobPollerConfig::from(&config.worker));
            tokio::spawn(poller.run(shutdown.clone()))
        }
    };

    wait_for_signal().await;
    tracing::info!("Shutdown signal received, stopping");
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(Ok(()))) => tracing::info!("Consumer stopped cleanly"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Consumer exited with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer task panicked"),
        Err(_) => tracing::warn!("Consumer did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }

    let stats = counters.stats();
    tracing::info!(
        processed = stats.processed,
        failed = stats.failed,
        "Job totals for this process"
    );

    pool.close().await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "SIGTERM handler unavailable"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
