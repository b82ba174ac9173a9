// Job Queue - API Core
//
// Durable job records tracked through a bounded lifecycle on Postgres:
// transactional enqueue, compare-and-swap status advances, LISTEN/NOTIFY
// wake signals and scheduled retention cleanup.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
