//! Integration tests for the embedded migrations and database bootstrap.

use chrono::{Duration, Utc};

use prixfixe_db::models::MealPlanStatus;
use prixfixe_db::pool;
use prixfixe_db::queries::meal_plans;
use prixfixe_test_utils::fixtures::{self, PlanBuilder, RecipeBuilder};
use prixfixe_test_utils::{create_catalog_test_db, create_test_db, drop_test_db, test_db_config};

#[tokio::test]
async fn migrations_create_every_table() {
    let (pool, db_name) = create_test_db().await;

    let names: Vec<String> = sqlx::query_scalar(
        "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public'",
    )
    .fetch_all(&pool)
    .await
    .expect("list tables");

    for expected in [
        "households",
        "household_memberships",
        "valid_measurement_units",
        "valid_measurement_unit_conversions",
        "recipes",
        "recipe_steps",
        "recipe_prep_tasks",
        "meals",
        "meal_plans",
        "meal_plan_events",
        "meal_plan_options",
        "meal_plan_option_votes",
        "meal_plan_tasks",
        "meal_plan_grocery_list_items",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing table {expected}");
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    pool::run_migrations(&pool)
        .await
        .expect("second migration run should be a no-op");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn lifecycle_summary_tracks_plans() {
    let (pool, db_name) = create_catalog_test_db(&[("onion", "onion")]).await;

    let empty = pool::lifecycle_summary(&pool).await.expect("summary");
    assert_eq!(empty, pool::LifecycleSummary::default());

    RecipeBuilder::new("r1")
        .step(0)
        .ingredient(0, "onion", "g", 100.0, None)
        .insert(&pool)
        .await;
    fixtures::meal(&pool, "m1", 1.0, &[("r1", 1.0)]).await;
    fixtures::household(&pool, "h1", &["u1"]).await;
    for (plan, event, option) in [("p1", "e1", "o1"), ("p2", "e2", "o2")] {
        PlanBuilder::new(plan, "h1", Utc::now() + Duration::days(1))
            .event(event, Utc::now() + Duration::days(2), &[(option, "m1")])
            .insert(&pool)
            .await;
    }
    meal_plans::set_status(&pool, "p2", MealPlanStatus::Finalized, "")
        .await
        .expect("finalize p2");

    let summary = pool::lifecycle_summary(&pool).await.expect("summary");
    assert_eq!(summary.households, 1);
    assert_eq!(summary.meals, 1);
    assert_eq!(summary.plans(MealPlanStatus::AwaitingVotes), 1);
    assert_eq!(summary.plans(MealPlanStatus::Finalized), 1);
    assert_eq!(summary.plans(MealPlanStatus::FinalizationFailed), 0);
    assert_eq!(summary.plans_pending_generation, 1);
    assert_eq!(summary.open_tasks, 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn bootstrap_creates_only_missing_databases() {
    let (pool, db_name) = create_test_db().await;
    pool.close().await;
    let config = test_db_config(&db_name).await;

    let created = pool::ensure_database_exists(&config).await.expect("existing database");
    assert!(!created);

    pool::drop_database(&config).await.expect("drop");
    let created = pool::ensure_database_exists(&config).await.expect("recreate");
    assert!(created);

    pool::drop_database(&config).await.expect("drop again");
}

#[tokio::test]
async fn bootstrap_rejects_unsafe_database_names() {
    let config = test_db_config("prixfixe_ok").await.for_database("bad-name;");
    let err = pool::ensure_database_exists(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("must be ASCII alphanumerics"));
}
