//! Wake signals over Postgres LISTEN/NOTIFY.
//!
//! The `jobs` triggers publish an empty payload on [`JOBS_AVAILABLE_CHANNEL`]
//! whenever a row enters PENDING. A signal only means "go look": it names no
//! job, and one missed while unsubscribed is gone for good. Consumers pair
//! [`JobWakeups::wait`] with a reconciling scan on timeout.

use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::error::JobError;

/// Channel the status triggers notify on.
pub const JOBS_AVAILABLE_CHANNEL: &str = "jobs_available";

/// Why [`JobWakeups::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// At least one signal arrived.
    Signaled,
    /// Nothing arrived within the timeout; time for a reconciling scan.
    TimedOut,
    /// The listener connection dropped. Signals may have been lost, so the
    /// caller should scan; the listener reconnects on the next wait.
    Interrupted,
}

/// A live subscription to the wake channel on a dedicated connection.
pub struct JobWakeups {
    listener: PgListener,
}

impl JobWakeups {
    pub async fn subscribe(pool: &PgPool) -> Result<Self, JobError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(JOBS_AVAILABLE_CHANNEL).await?;
        debug!(channel = JOBS_AVAILABLE_CHANNEL, "listening for job wakeups");
        Ok(Self { listener })
    }

    /// Wait up to `timeout` for a signal. Bursts are coalesced: any signals
    /// already buffered behind the first are consumed too.
    pub async fn wait(&mut self, timeout: Duration) -> Wakeup {
        match tokio::time::timeout(timeout, self.listener.recv()).await {
            Err(_) => Wakeup::TimedOut,
            Ok(Ok(_)) => {
                let mut coalesced = 0usize;
                while self.listener.next_buffered().is_some() {
                    coalesced += 1;
                }
                debug!(coalesced, "job wakeup received");
                Wakeup::Signaled
            }
            Ok(Err(e)) => {
                warn!(error = %e, "wakeup listener interrupted");
                Wakeup::Interrupted
            }
        }
    }
}
