//! Outcome counters for the job lifecycle.
//!
//! Counters are process-local and monotonic. The server exposes its copy on
//! `/health`; a worker logs its totals when it stops.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::error::JobError;

#[derive(Debug, Default)]
pub struct JobCounters {
    enqueued: AtomicU64,
    enqueue_failures: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`JobCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub enqueued: u64,
    /// Inserts the store rejected or could not commit. Validation
    /// rejections are not counted.
    pub enqueue_failures: u64,
    /// Jobs a handler ran to SUCCEEDED.
    pub processed: u64,
    /// Jobs a handler moved to FAILED.
    pub failed: u64,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the outcome of one enqueue attempt.
    pub fn record_enqueue<T>(&self, result: &Result<T, JobError>) {
        match result {
            Ok(_) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(JobError::Validation(_)) => {}
            Err(_) => {
                self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobStats {
        JobStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejections_are_not_failures() {
        let counters = JobCounters::new();

        counters.record_enqueue::<()>(&Ok(()));
        counters.record_enqueue::<()>(&Err(JobError::Validation("Description is required".into())));
        counters.record_enqueue::<()>(&Err(JobError::Storage(sqlx::Error::PoolTimedOut)));

        assert_eq!(
            counters.snapshot(),
            JobStats {
                enqueued: 1,
                enqueue_failures: 1,
                processed: 0,
                failed: 0,
            }
        );
    }

    #[test]
    fn worker_outcomes_accumulate() {
        let counters = JobCounters::new();
        counters.record_processed();
        counters.record_processed();
        counters.record_failed();

        let stats = counters.snapshot();
        assert_eq!((stats.processed, stats.failed), (2, 1));
    }
}
