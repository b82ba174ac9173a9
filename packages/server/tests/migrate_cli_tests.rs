//! End-to-end tests for the operator CLI binary.
//!
//! Each command prints one JSON object; these tests run the built binary
//! against the per-test database and read that object back.

mod common;

use std::process::Output;

use crate::common::{age_job, count_jobs, succeeded_job, TestHarness};
use serde_json::Value;
use test_context::test_context;
use tokio::process::Command;

async fn migrate_cli(ctx: &TestHarness, args: &[&str]) -> (Output, Value) {
    let output = Command::new(env!("CARGO_BIN_EXE_migrate_cli"))
        .args(args)
        .env("DATABASE_URL", &ctx.database_url)
        .env("RUST_LOG", "off")
        .output()
        .await
        .expect("Failed to run migrate_cli");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    let body = serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("migrate_cli printed {:?}: {}", stdout, e));
    (output, body)
}

#[test_context(TestHarness)]
#[tokio::test]
async fn migrate_is_rerunnable(ctx: &TestHarness) {
    let (output, body) = migrate_cli(ctx, &["migrate"]).await;

    assert!(output.status.success());
    assert_eq!(body["success"], true);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reap_reports_how_many_jobs_it_removed(ctx: &TestHarness) {
    let store = ctx.store();
    for i in 0..2 {
        let job = succeeded_job(&store, &format!("expired {}", i)).await;
        age_job(&ctx.db_pool, job.id, "2 days").await;
    }
    succeeded_job(&store, "fresh").await;

    let (output, body) =
        migrate_cli(ctx, &["reap", "--retention", "1 day", "--batch-size", "1"]).await;

    assert!(output.status.success());
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);
    assert_eq!(count_jobs(&ctx.db_pool).await, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reap_with_bad_retention_fails_without_deleting(ctx: &TestHarness) {
    let store = ctx.store();
    let job = succeeded_job(&store, "expired").await;
    age_job(&ctx.db_pool, job.id, "2 days").await;

    let (output, body) = migrate_cli(ctx, &["reap", "--retention", "someday"]).await;

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("invalid retention interval"));
    assert_eq!(count_jobs(&ctx.db_pool).await, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn schedule_without_pg_cron_reports_failure(ctx: &TestHarness) {
    let (output, body) = migrate_cli(ctx, &["schedule"]).await;

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}
