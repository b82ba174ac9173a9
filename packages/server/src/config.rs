use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub port: u16,
    pub reaper: ReaperConfig,
    pub worker: WorkerSettings,
}

/// Connection pool settings. Every connection has a bounded lifetime and
/// callers never wait forever for one.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Where the retention reaper gets scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperBackend {
    /// Registered inside Postgres via the pg_cron extension
    PgCron,
    /// Registered on an in-process tokio-cron-scheduler
    InProcess,
}

impl FromStr for ReaperBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pg_cron" | "pgcron" => Ok(ReaperBackend::PgCron),
            "in_process" | "inprocess" => Ok(ReaperBackend::InProcess),
            other => Err(anyhow!("unknown reaper backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub enabled: bool,
    /// Five-field cron expression
    pub schedule: String,
    /// Postgres interval literal, e.g. "1 day"
    pub retention: String,
    pub backend: ReaperBackend,
    pub batch_size: i32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 * * * *".to_string(),
            retention: "1 day".to_string(),
            backend: ReaperBackend::PgCron,
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Worker,
    Poller,
}

impl FromStr for WorkerRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" => Ok(WorkerRole::Worker),
            "poller" => Ok(WorkerRole::Poller),
            other => Err(anyhow!("ROLE must be poller or worker, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub role: WorkerRole,
    pub wake_timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    /// Postgres interval literal
    pub running_timeout: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ReaperConfig::default();

        Ok(Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_positive(&lookup, "DB_MAX_CONNECTIONS", 10)?,
                acquire_timeout: parse_secs(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
                max_lifetime: parse_secs(&lookup, "DB_MAX_LIFETIME_SECS", 1800)?,
            },
            port: parse_or(&lookup, "PORT", 8080)?,
            reaper: ReaperConfig {
                enabled: parse_or(&lookup, "REAPER_ENABLED", defaults.enabled)?,
                schedule: lookup("REAPER_SCHEDULE").unwrap_or(defaults.schedule),
                retention: lookup("REAPER_RETENTION").unwrap_or(defaults.retention),
                backend: parse_or(&lookup, "REAPER_BACKEND", defaults.backend)?,
                batch_size: parse_or(&lookup, "REAPER_BATCH_SIZE", defaults.batch_size)?,
            },
            worker: WorkerSettings {
                role: parse_or(&lookup, "WORKER_ROLE", WorkerRole::Worker)?,
                wake_timeout: parse_secs(&lookup, "WORKER_WAKE_TIMEOUT_SECS", 5)?,
                poll_interval: parse_secs(&lookup, "WORKER_POLL_INTERVAL_SECS", 10)?,
                max_attempts: parse_or(&lookup, "WORKER_MAX_ATTEMPTS", 3)?,
                running_timeout: lookup("WORKER_RUNNING_TIMEOUT")
                    .unwrap_or_else(|| "5 minutes".to_string()),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
    }
}

/// Counts and durations where zero would stall or spin the process.
fn parse_positive<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, name, default)?;
    if value <= T::default() {
        bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

fn parse_secs<F>(lookup: &F, name: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_positive(lookup, name, default).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn database_url_is_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/jobs")]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.acquire_timeout, Duration::from_secs(5));
        assert!(config.reaper.enabled);
        assert_eq!(config.reaper.schedule, "0 * * * *");
        assert_eq!(config.reaper.retention, "1 day");
        assert_eq!(config.reaper.backend, ReaperBackend::PgCron);
        assert_eq!(config.worker.role, WorkerRole::Worker);
        assert_eq!(config.worker.max_attempts, 3);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("PORT", "9000"),
            ("REAPER_ENABLED", "false"),
            ("REAPER_SCHEDULE", "*/5 * * * *"),
            ("REAPER_RETENTION", "2 hours"),
            ("REAPER_BACKEND", "in_process"),
            ("WORKER_ROLE", "poller"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(!config.reaper.enabled);
        assert_eq!(config.reaper.schedule, "*/5 * * * *");
        assert_eq!(config.reaper.retention, "2 hours");
        assert_eq!(config.reaper.backend, ReaperBackend::InProcess);
        assert_eq!(config.worker.role, WorkerRole::Poller);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("PORT", "not-a-port"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("WORKER_ROLE", "janitor"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("WORKER_ROLE"));
    }

    #[test]
    fn zero_durations_are_rejected() {
        for name in [
            "WORKER_POLL_INTERVAL_SECS",
            "WORKER_WAKE_TIMEOUT_SECS",
            "DB_ACQUIRE_TIMEOUT_SECS",
            "DB_MAX_LIFETIME_SECS",
            "DB_MAX_CONNECTIONS",
        ] {
            let err = config_from(&[("DATABASE_URL", "postgres://localhost/jobs"), (name, "0")])
                .unwrap_err();
            assert!(
                err.to_string().contains(name) && err.to_string().contains("greater than zero"),
                "{}: {}",
                name,
                err
            );
        }
    }

    #[test]
    fn poll_interval_and_wake_timeout_are_read_in_seconds() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("WORKER_POLL_INTERVAL_SECS", "1"),
            ("WORKER_WAKE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.worker.poll_interval, Duration::from_secs(1));
        assert_eq!(config.worker.wake_timeout, Duration::from_secs(30));
    }
}
