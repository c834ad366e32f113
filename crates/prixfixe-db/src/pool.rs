//! Pools, migrations, and bootstrap of the prixfixe database.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;
use crate::models::MealPlanStatus;

/// Migrations embedded at compile time from `crates/prixfixe-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    info!(migrations = MIGRATOR.iter().count(), "migrations applied");
    Ok(())
}

/// Database name from the URL, restricted to characters that are safe to
/// splice into `CREATE DATABASE` / `DROP DATABASE`.
fn identifier(config: &DbConfig) -> Result<&str> {
    let name = config
        .database_name()
        .context("could not determine database name from URL")?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("database name {name:?} must be ASCII alphanumerics or '_'");
    }
    Ok(name)
}

async fn maintenance_pool(config: &DbConfig) -> Result<PgPool> {
    let url = config.maintenance_url();
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect(&url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {url}"))
}

/// Create the target database when it is missing. Returns whether it was
/// created.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let name = identifier(config)?;
    let maint = maintenance_pool(config).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&maint)
            .await
            .context("failed to query pg_database")?;
    if !exists {
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .with_context(|| format!("failed to create database {name}"))?;
    }
    maint.close().await;

    info!(db = name, created = !exists, "database ready");
    Ok(!exists)
}

/// Disconnect every session and drop the target database if it exists.
pub async fn drop_database(config: &DbConfig) -> Result<()> {
    let name = identifier(config)?;
    let maint = maintenance_pool(config).await?;

    sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(name)
    .execute(&maint)
    .await
    .with_context(|| format!("failed to disconnect sessions from {name}"))?;
    maint
        .execute(format!("DROP DATABASE IF EXISTS {name}").as_str())
        .await
        .with_context(|| format!("failed to drop database {name}"))?;
    maint.close().await;

    info!(db = name, "database dropped");
    Ok(())
}

/// Where the meal-plan lifecycle stands, as reported by `prixfixe db-init`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleSummary {
    pub households: i64,
    pub meals: i64,
    /// Plan counts per status; statuses with no plans are omitted.
    pub plans_by_status: Vec<(MealPlanStatus, i64)>,
    /// Prep tasks still `unfinished` or `in_progress`.
    pub open_tasks: i64,
    /// Grocery items still `needs_purchase` or `unknown`.
    pub groceries_to_buy: i64,
    /// Finalized plans whose tasks or grocery list have not been built yet.
    pub plans_pending_generation: i64,
}

impl LifecycleSummary {
    pub fn plans(&self, status: MealPlanStatus) -> i64 {
        self.plans_by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

pub async fn lifecycle_summary(pool: &PgPool) -> Result<LifecycleSummary> {
    let (households, meals, open_tasks, groceries_to_buy, plans_pending_generation): (
        i64,
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        "SELECT \
           (SELECT COUNT(*) FROM households), \
           (SELECT COUNT(*) FROM meals), \
           (SELECT COUNT(*) FROM meal_plan_tasks \
             WHERE status IN ('unfinished', 'in_progress')), \
           (SELECT COUNT(*) FROM meal_plan_grocery_list_items \
             WHERE status IN ('needs_purchase', 'unknown')), \
           (SELECT COUNT(*) FROM meal_plans \
             WHERE status = 'finalized' \
               AND (NOT tasks_created OR NOT grocery_list_initialized))",
    )
    .fetch_one(pool)
    .await
    .context("failed to summarize meal plan lifecycle")?;

    let plans_by_status: Vec<(MealPlanStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM meal_plans GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
    .context("failed to count meal plans by status")?;

    Ok(LifecycleSummary {
        households,
        meals,
        plans_by_status,
        open_tasks,
        groceries_to_buy,
        plans_pending_generation,
    })
}
