//! Job queue infrastructure.
//!
//! - [`Job`] / [`JobStatus`] - the durable record and its lifecycle graph
//! - [`JobStore`] / [`PostgresJobStore`] - conditional status advances
//! - [`queue::enqueue`] - transactional insert
//! - [`notifier`] - payload-free wake signals over LISTEN/NOTIFY
//! - [`reaper`] - scheduled retention cleanup
//! - [`JobCounters`] - enqueue and processing outcome counts
//! - [`JobWorker`] / [`JobPoller`] - consumer processes
//!
//! # Architecture
//!
//! ```text
//! POST /api/jobs
//!     │
//!     └─► queue::enqueue()  BEGIN → INSERT (PENDING) → COMMIT
//!             └─► trigger: pg_notify('jobs_available', '')   (on commit)
//!
//! JobWorker ◄── LISTEN jobs_available (or wake timeout)
//!     └─► claim_next() → handler → complete() / fail()
//!
//! GET /api/jobs/:id ─► find_by_id()   (no cache)
//!
//! Reaper (pg_cron or in-process) ─► delete SUCCEEDED older than retention
//! ```

mod error;
mod job;
mod job_store;
pub mod notifier;
pub mod queue;
pub mod reaper;
mod stats;
pub mod testing;
mod worker;

pub use error::JobError;
pub use job::{validate_description, AdvanceFields, Job, JobStatus};
pub use job_store::{JobStore, PostgresJobStore};
pub use notifier::{JobWakeups, Wakeup, JOBS_AVAILABLE_CHANNEL};
pub use reaper::{reap_succeeded, ReaperHandle};
pub use stats::{JobCounters, JobStats};
pub use worker::{JobHandler, JobPoller, JobPollerConfig, JobWorker, JobWorkerConfig, PollOutcome};
