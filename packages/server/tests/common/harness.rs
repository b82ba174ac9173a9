//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by every test in a binary. Each test gets
//! its own freshly migrated database inside it, because consumers and the
//! reaper operate on whole tables and would see each other's rows otherwise.

use anyhow::{Context, Result};
use jobs_core::kernel::db;
use jobs_core::kernel::jobs::PostgresJobStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    /// Server URL without a database path
    server_url: String,
    // Keep container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;

        Ok(Self {
            server_url: format!("postgresql://postgres:postgres@{}:{}", pg_host, pg_port),
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }

    fn database_url(&self, name: &str) -> String {
        format!("{}/{}", self.server_url, name)
    }

    /// A one-off connection to the maintenance database. Pools are not kept
    /// here since every test runs on its own runtime.
    async fn admin(&self) -> Result<PgConnection> {
        PgConnection::connect(&self.database_url("postgres"))
            .await
            .context("Failed to connect to maintenance database")
    }
}

/// Per-test database on the shared container.
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let store = ctx.store();
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    /// Database pool - use this for test fixtures.
    pub db_pool: PgPool,
    pub database_url: String,
    database_name: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        if let Err(e) = self.drop_database().await {
            eprintln!("failed to drop test database: {:#}", e);
        }
    }
}

impl TestHarness {
    /// Create and migrate a fresh database for one test.
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let database_name = format!("jobs_test_{}", Uuid::new_v4().simple());

        let mut admin = infra.admin().await?;
        sqlx::query(&format!("CREATE DATABASE {}", database_name))
            .execute(&mut admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await?;

        let database_url = infra.database_url(&database_name);
        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("Failed to connect to test database")?;

        db::migrate(&db_pool).await?;

        Ok(Self {
            db_pool,
            database_url,
            database_name,
        })
    }

    pub fn store(&self) -> PostgresJobStore {
        PostgresJobStore::new(self.db_pool.clone())
    }

    async fn drop_database(self) -> Result<()> {
        self.db_pool.close().await;

        let infra = SharedTestInfra::get().await;
        let mut admin = infra.admin().await?;
        sqlx::query(&format!(
            "DROP DATABASE IF EXISTS {} WITH (FORCE)",
            self.database_name
        ))
        .execute(&mut admin)
        .await?;
        admin.close().await?;
        Ok(())
    }
}
