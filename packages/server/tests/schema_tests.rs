//! Schema invariants and migration re-runs.

mod common;

use crate::common::TestHarness;
use jobs_core::kernel::db;
use test_context::test_context;

const SCHEMA: &str = include_str!("../migrations/20250101000000_create_jobs.sql");

async fn schema_fingerprint(pool: &sqlx::PgPool) -> (i64, i64, Vec<String>) {
    let enums = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM pg_type WHERE typname = 'job_status'",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let triggers = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM pg_trigger
        WHERE tgrelid = 'jobs'::regclass AND NOT tgisinternal
        "#,
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let columns = sqlx::query_scalar::<_, String>(
        r#"
        SELECT column_name::text
        FROM information_schema.columns
        WHERE table_name = 'jobs'
        ORDER BY ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
    .unwrap();

    (enums, triggers, columns)
}

#[test_context(TestHarness)]
#[tokio::test]
async fn schema_setup_is_idempotent(ctx: &TestHarness) {
    let before = schema_fingerprint(&ctx.db_pool).await;

    db::migrate(&ctx.db_pool).await.unwrap();
    sqlx::raw_sql(SCHEMA).execute(&ctx.db_pool).await.unwrap();

    let after = schema_fingerprint(&ctx.db_pool).await;
    assert_eq!(before, after);
    assert_eq!(after.0, 1);
    assert_eq!(after.1, 2);
    assert_eq!(
        after.2,
        vec![
            "id",
            "description",
            "status",
            "created_at",
            "updated_at",
            "enqueued_at",
            "started_at",
            "attempts",
            "last_error",
        ]
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn blank_description_is_rejected_by_the_table(ctx: &TestHarness) {
    let result = sqlx::query("INSERT INTO jobs (description) VALUES ('  ')")
        .execute(&ctx.db_pool)
        .await;

    assert!(result.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn updated_at_cannot_precede_created_at(ctx: &TestHarness) {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO jobs (description) VALUES ('clock skew') RETURNING id",
    )
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();

    let result = sqlx::query(
        "UPDATE jobs SET updated_at = created_at - INTERVAL '1 second' WHERE id = $1",
    )
    .bind(id)
    .execute(&ctx.db_pool)
    .await;

    assert!(result.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn ids_cannot_be_supplied_by_callers(ctx: &TestHarness) {
    let result = sqlx::query("INSERT INTO jobs (id, description) VALUES (1, 'forged')")
        .execute(&ctx.db_pool)
        .await;

    assert!(result.is_err());
}
