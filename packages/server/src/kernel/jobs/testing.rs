//! Job testing utilities.
//!
//! [`InMemoryJobStore`] follows the same lifecycle graph, timestamp rules and
//! compare-and-swap semantics as the Postgres store, so HTTP adapters and
//! consumers can be exercised without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use super::error::JobError;
use super::job::{validate_description, AdvanceFields, Job, JobStatus};
use super::job_store::JobStore;
use super::stats::{JobCounters, JobStats};

#[derive(Default)]
struct State {
    last_id: i64,
    jobs: BTreeMap<i64, Job>,
}

/// In-process job store for tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
    wakeups: Arc<Notify>,
    unavailable: AtomicBool,
    counters: JobCounters,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Signalled whenever a job enters PENDING.
    pub fn wakeups(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeups)
    }

    /// Snapshot of every stored job, ordered by id.
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    async fn insert(&self, description: Option<&str>) -> Result<Job, JobError> {
        let description = validate_description(description)?;
        self.check_available()?;

        let mut state = self.state.lock().await;
        state.last_id += 1;
        let now = Utc::now();
        let job = Job {
            id: state.last_id,
            description: description.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            enqueued_at: None,
            started_at: None,
            attempts: 0,
            last_error: None,
        };
        state.jobs.insert(job.id, job.clone());
        drop(state);

        self.wakeups.notify_waiters();
        Ok(job)
    }

    fn check_available(&self) -> Result<(), JobError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(JobError::Storage(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, description: Option<&str>) -> Result<Job, JobError> {
        let result = self.insert(description).await;
        self.counters.record_enqueue(&result);
        result
    }

    async fn find_by_id(&self, id: i64) -> Result<Job, JobError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .jobs
            .get(&id)
            .cloned()
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
        self.check_available()?;

        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status != from {
            return Err(JobError::Conflict {
                id,
                expected: from,
                actual: job.status,
            });
        }

        job.apply(to, &fields, Utc::now());
        let job = job.clone();
        drop(state);

        if to.is_eligible() {
            self.wakeups.notify_waiters();
        }
        Ok(job)
    }

    async fn ping(&self) -> Result<(), JobError> {
        self.check_available()
    }

    fn stats(&self) -> JobStats {
        self.counters.snapshot()
    }
}
