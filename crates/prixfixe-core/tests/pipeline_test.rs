//! Integration tests for the worker pipeline: finalize, prep tasks, grocery.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use prixfixe_core::catalog::CatalogHandle;
use prixfixe_core::events::EventBus;
use prixfixe_core::grocery::initialize_grocery_list;
use prixfixe_core::schedule::create_tasks_for_plan;
use prixfixe_core::workers::{WorkerConfig, Workers};
use prixfixe_db::models::{MealPlanStatus, MealPlanTaskStatus};
use prixfixe_db::queries::{grocery_list, meal_plan_tasks, meal_plans};
use prixfixe_test_utils::fixtures::{self, PlanBuilder, RecipeBuilder};
use prixfixe_test_utils::{create_catalog_test_db, create_test_db, drop_test_db};

/// Two meals with butter in different units, one with a prep task and a
/// supporting stock recipe. Plan `p1` has one single-option event per meal
/// and a deadline in the past, so it is due immediately.
async fn seed(pool: &PgPool) {
    fixtures::basic_catalog(pool, &[("butter", "butter"), ("onion", "onion")]).await;
    RecipeBuilder::new("stock")
        .step(0)
        .ingredient(0, "onion", "g", 50.0, None)
        .prep_task("simmer", "simmer stock", 86_400, Some(172_800))
        .task_step("simmer", 0, true)
        .insert(pool)
        .await;
    RecipeBuilder::new("r1")
        .supporting("stock")
        .step(0)
        .ingredient(0, "onion", "g", 200.0, None)
        .product(0, 0, "chopped onion")
        .step(1)
        .uses_product(1, 0, 0, "g")
        .ingredient(1, "butter", "g", 100.0, None)
        .prep_task("chop", "chop onion", 3600, Some(7200))
        .task_step("chop", 0, true)
        .prep_task("peel", "peel onion", 3600, None)
        .task_step("peel", 0, false)
        .insert(pool)
        .await;
    RecipeBuilder::new("r2")
        .step(0)
        .ingredient(0, "butter", "lb", 0.25, None)
        .insert(pool)
        .await;
    fixtures::meal(pool, "m1", 1.0, &[("r1", 1.0)]).await;
    fixtures::meal(pool, "m2", 1.0, &[("r2", 1.0)]).await;
    fixtures::household(pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() - Duration::minutes(5))
        .event("e1", Utc::now() + Duration::days(2), &[("o1", "m1")])
        .event("e2", Utc::now() + Duration::days(3), &[("o2", "m2")])
        .insert(pool)
        .await;
}

async fn workers(pool: &PgPool) -> Workers {
    let w = Workers::new(
        pool.clone(),
        CatalogHandle::default(),
        EventBus::new(),
        WorkerConfig::default(),
    );
    w.reload_catalog().await.expect("load catalog");
    w
}

#[tokio::test]
async fn full_cycle_finalizes_schedules_and_shops() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool).await;
    let w = workers(&pool).await;
    let cancel = CancellationToken::new();

    let report = w.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.finalize.count, 1);
    assert!(!report.finalize.timed_out);
    assert_eq!(report.households.len(), 1);
    assert!(report.households[0].tasks.success);
    assert!(report.households[0].grocery.success);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::Finalized);
    assert!(plan.tasks_created);
    assert!(plan.grocery_list_initialized);

    // `peel` only targets the step `chop` satisfies, so it is folded in.
    let tasks = meal_plan_tasks::tasks_for_plan(&pool, "p1").await.unwrap();
    let names: Vec<&str> = tasks.iter().map(|t| t.recipe_prep_task_id.as_str()).collect();
    assert_eq!(names, vec!["chop", "simmer"]);
    assert!(tasks.iter().all(|t| t.status == MealPlanTaskStatus::Unfinished));
    assert!(tasks[0].creation_explanation.contains("subsumes 'peel onion'"));

    let items = grocery_list::items_for_plan(&pool, "p1").await.unwrap();
    let lines: Vec<(&str, &str)> = items
        .iter()
        .map(|i| (i.ingredient_id.as_str(), i.measurement_unit_id.as_str()))
        .collect();
    assert_eq!(lines, vec![("butter", "g"), ("onion", "g")]);
    assert!((items[0].min_qty_needed - 213.398).abs() < 1e-6);
    assert!((items[1].min_qty_needed - 250.0).abs() < 1e-9);

    // Nothing left to do on a second pass.
    let again = w.run_cycle(&cancel).await.unwrap();
    assert_eq!(again.finalize.count, 0);
    assert!(again.households.is_empty());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn builders_are_idempotent() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool).await;
    let w = workers(&pool).await;
    w.finalize_meal_plans(&CancellationToken::new()).await.unwrap();

    let catalog = w.catalog.snapshot();
    let events = EventBus::new();
    let snapshot = |pool: PgPool| async move {
        let tasks: Vec<(String, String, i32)> = meal_plan_tasks::tasks_for_plan(&pool, "p1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| (t.id, t.recipe_prep_task_id, t.sequence))
            .collect();
        let items: Vec<(String, String, String)> = grocery_list::items_for_plan(&pool, "p1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.id, i.ingredient_id, format!("{:.6}", i.min_qty_needed)))
            .collect();
        (tasks, items)
    };

    create_tasks_for_plan(&pool, &catalog, &events, "p1", Utc::now())
        .await
        .unwrap();
    initialize_grocery_list(&pool, &catalog, &events, "p1", Utc::now())
        .await
        .unwrap();
    let first = snapshot(pool.clone()).await;
    create_tasks_for_plan(&pool, &catalog, &events, "p1", Utc::now())
        .await
        .unwrap();
    initialize_grocery_list(&pool, &catalog, &events, "p1", Utc::now())
        .await
        .unwrap();
    let second = snapshot(pool.clone()).await;
    assert_eq!(first, second);
    assert_eq!(first.0.len(), 2);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn invalid_recipe_is_recorded_on_the_option() {
    let (pool, db_name) = create_catalog_test_db(&[("onion", "onion")]).await;
    // Step 0 consumes the product of step 1.
    RecipeBuilder::new("broken")
        .step(0)
        .uses_product(0, 1, 0, "g")
        .step(1)
        .ingredient(1, "onion", "g", 10.0, None)
        .product(1, 0, "onion bits")
        .prep_task("t", "prep", 60, None)
        .task_step("t", 0, true)
        .insert(&pool)
        .await;
    fixtures::meal(&pool, "m1", 1.0, &[("broken", 1.0)]).await;
    fixtures::household(&pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() - Duration::minutes(1))
        .event("e1", Utc::now() + Duration::days(1), &[("o1", "m1")])
        .insert(&pool)
        .await;

    let w = workers(&pool).await;
    let report = w.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(report.households[0].tasks.success);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::Finalized);
    assert!(plan.tasks_created);
    assert!(meal_plan_tasks::tasks_for_plan(&pool, "p1").await.unwrap().is_empty());

    let option = meal_plans::options_for_event(&pool, "e1").await.unwrap().remove(0);
    assert!(
        option.prep_explanation.contains("invalid recipe graph"),
        "{}",
        option.prep_explanation
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn builders_refuse_unfinalized_plans() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool).await;
    let w = workers(&pool).await;
    let catalog = w.catalog.snapshot();

    let err = create_tasks_for_plan(&pool, &catalog, &w.events, "p1", Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    let err = initialize_grocery_list(&pool, &catalog, &w.events, "missing", Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancelled_run_leaves_plans_untouched() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool).await;
    let w = workers(&pool).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = w.finalize_meal_plans(&cancel).await.unwrap();
    assert_eq!(report.count, 0);
    assert_eq!(report.skipped, vec!["p1".to_owned()]);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::AwaitingVotes);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn exhausted_budget_skips_remaining_plans() {
    let (pool, db_name) = create_test_db().await;
    seed(&pool).await;
    let w = Workers {
        config: WorkerConfig {
            budget: StdDuration::ZERO,
            ..WorkerConfig::default()
        },
        ..workers(&pool).await
    };

    let report = w.finalize_meal_plans(&CancellationToken::new()).await.unwrap();
    assert!(report.timed_out);
    assert_eq!(report.count, 0);

    let plan = meal_plans::get_meal_plan(&pool, "p1").await.unwrap().unwrap();
    assert_eq!(plan.status, MealPlanStatus::AwaitingVotes);

    drop_test_db(&db_name).await;
}
