//! Operator CLI for the job schema and the retention reaper
//!
//! Every command prints a single JSON object so the output can be parsed by
//! scripts.

use anyhow::Result;
use clap::{Parser, Subcommand};
use jobs_core::config::Config;
use jobs_core::kernel::{db, jobs::reaper};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "migrate_cli")]
#[command(about = "Job queue schema and maintenance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations
    Migrate,

    /// Delete expired SUCCEEDED jobs now
    Reap {
        /// Postgres interval, defaults to REAPER_RETENTION
        #[arg(long)]
        retention: Option<String>,
        #[arg(long)]
        batch_size: Option<i32>,
    },

    /// Register the reaper with pg_cron
    Schedule,

    /// Remove the reaper from pg_cron
    Unschedule,
}

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cron_job_id: Option<i64>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            count: None,
            cron_job_id: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            ..Self::ok()
        }
    }
}

fn output(resp: &Response) -> Result<()> {
    println!("{}", serde_json::to_string(resp)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let response = match run(cli.command, &config).await {
        Ok(response) => response,
        Err(e) => Response::failed(format!("{:#}", e)),
    };

    output(&response)?;

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, config: &Config) -> Result<Response> {
    let pool = db::connect(&config.database).await?;

    let response = match command {
        Commands::Migrate => {
            db::migrate(&pool).await?;
            Response {
                message: Some("migrations applied".to_string()),
                ..Response::ok()
            }
        }
        Commands::Reap {
            retention,
            batch_size,
        } => {
            let retention = retention.unwrap_or_else(|| config.reaper.retention.clone());
            reaper::validate_retention(&pool, &retention).await?;
            let count = reaper::reap_succeeded(
                &pool,
                &retention,
                batch_size.unwrap_or(config.reaper.batch_size),
            )
            .await?;
            Response {
                count: Some(count),
                ..Response::ok()
            }
        }
        Commands::Schedule => {
            let cron_job_id = reaper::register_pg_cron(&pool, &config.reaper).await?;
            Response {
                cron_job_id: Some(cron_job_id),
                ..Response::ok()
            }
        }
        Commands::Unschedule => {
            let removed = reaper::unschedule_pg_cron(&pool).await?;
            Response {
                count: Some(removed as u64),
                ..Response::ok()
            }
        }
    };

    pool.close().await;
    Ok(response)
}
