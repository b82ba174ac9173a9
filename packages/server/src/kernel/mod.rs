//! Kernel module - server infrastructure and dependencies.

pub mod db;
pub mod jobs;
pub mod scheduled_tasks;

pub use db::{connect, migrate};
