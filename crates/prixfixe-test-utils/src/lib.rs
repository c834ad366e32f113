//! Test databases for prixfixe integration tests.
//!
//! One PostgreSQL server is shared by every test in a binary: the server at
//! `PRIXFIXE_TEST_PG_URL` (a URL without a database name) when that is set,
//! otherwise a container started on first use. Each test then gets its own
//! freshly migrated database on that server.

use std::time::Duration;

use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use prixfixe_db::config::DbConfig;
use prixfixe_db::pool;

pub mod fixtures;

/// Concurrent plan transactions a test may open; sizes each test pool.
const TEST_PLANS_IN_FLIGHT: u32 = 4;

struct TestServer {
    /// Points at the server's `postgres` database; per-test configs are
    /// derived from it with [`DbConfig::for_database`].
    config: DbConfig,
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<TestServer> = OnceCell::const_new();

async fn start_server() -> TestServer {
    let (root, container) = match std::env::var("PRIXFIXE_TEST_PG_URL") {
        Ok(url) => (url.trim_end_matches('/').to_owned(), None),
        Err(_) => {
            let container = Postgres::default()
                .with_tag("18")
                .start()
                .await
                .expect("failed to start PostgreSQL container");
            let host = container.get_host().await.expect("container host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("container port");
            (
                format!("postgresql://postgres:postgres@{host}:{port}"),
                Some(container),
            )
        }
    };

    let config = DbConfig {
        acquire_timeout: Duration::from_secs(30),
        ..DbConfig::new(format!("{root}/postgres")).with_plans_in_flight(TEST_PLANS_IN_FLIGHT)
    };
    TestServer {
        config,
        _container: container,
    }
}

/// Connection settings for database `db_name` on the shared test server.
pub async fn test_db_config(db_name: &str) -> DbConfig {
    SERVER
        .get_or_init(start_server)
        .await
        .config
        .for_database(db_name)
}

/// Create a uniquely named, migrated database. Returns `(pool, db_name)`;
/// hand `db_name` to [`drop_test_db`] at the end of the test.
pub async fn create_test_db() -> (PgPool, String) {
    let db_name = format!("prixfixe_test_{}", Uuid::new_v4().simple());
    let config = test_db_config(&db_name).await;

    pool::ensure_database_exists(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to create {db_name}: {e:#}"));
    let db = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {db_name}: {e:#}"));
    pool::run_migrations(&db)
        .await
        .expect("migrations should succeed");

    (db, db_name)
}

/// [`create_test_db`] with the reference catalog already seeded by
/// [`fixtures::basic_catalog`].
pub async fn create_catalog_test_db(ingredients: &[(&str, &str)]) -> (PgPool, String) {
    let (db, db_name) = create_test_db().await;
    fixtures::basic_catalog(&db, ingredients).await;
    (db, db_name)
}

/// Drop a database made by [`create_test_db`]. Failures are reported but do
/// not fail the test.
pub async fn drop_test_db(db_name: &str) {
    let config = test_db_config(db_name).await;
    if let Err(err) = pool::drop_database(&config).await {
        eprintln!("failed to drop test database {db_name}: {err:#}");
    }
}
