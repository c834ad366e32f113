//! Integration tests for task status changes and grocery item updates.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use prixfixe_core::catalog::CatalogHandle;
use prixfixe_core::events::EventBus;
use prixfixe_core::grocery::update_grocery_item;
use prixfixe_core::state::change_task_status;
use prixfixe_core::workers::{WorkerConfig, Workers};
use prixfixe_db::models::{GroceryListItemStatus, MealPlanTaskStatus};
use prixfixe_db::queries::grocery_list::{self, GroceryItemUpdate};
use prixfixe_db::queries::meal_plan_tasks;
use prixfixe_test_utils::fixtures::{self, PlanBuilder, RecipeBuilder};
use prixfixe_test_utils::{create_test_db, drop_test_db};

/// A finalized plan with one prep task and one grocery item. Returns the
/// ids of both.
async fn seed(pool: &PgPool) -> (String, String) {
    fixtures::basic_catalog(pool, &[("onion", "onion")]).await;
    RecipeBuilder::new("r1")
        .step(0)
        .ingredient(0, "onion", "g", 200.0, None)
        .prep_task("chop", "chop onion", 3600, None)
        .task_step("chop", 0, true)
        .insert(pool)
        .await;
    fixtures::meal(pool, "m1", 1.0, &[("r1", 1.0)]).await;
    fixtures::household(pool, "h1", &["u1"]).await;
    PlanBuilder::new("p1", "h1", Utc::now() - Duration::minutes(1))
        .event("e1", Utc::now() + Duration::days(1), &[("o1", "m1")])
        .insert(pool)
        .await;

    let workers = Workers::new(
        pool.clone(),
        CatalogHandle::default(),
        EventBus::new(),
        WorkerConfig::default(),
    );
    workers.reload_catalog().await.unwrap();
    workers.run_cycle(&CancellationToken::new()).await.unwrap();

    let task = meal_plan_tasks::tasks_for_plan(pool, "p1").await.unwrap().remove(0);
    let item = grocery_list::items_for_plan(pool, "p1").await.unwrap().remove(0);
    (task.id, item.id)
}

#[tokio::test]
async fn task_moves_through_its_lifecycle() {
    let (pool, db_name) = create_test_db().await;
    let (task_id, _) = seed(&pool).await;
    use MealPlanTaskStatus::*;

    let started = change_task_status(&pool, &task_id, Unfinished, InProgress, "on it")
        .await
        .unwrap();
    assert_eq!(started.status, InProgress);
    assert_eq!(started.status_explanation, "on it");
    assert!(started.completed_at.is_none());

    let done = change_task_status(&pool, &task_id, InProgress, Finished, "")
        .await
        .unwrap();
    assert_eq!(done.status, Finished);
    assert!(done.completed_at.is_some());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reopening_a_cancelled_task_clears_completion() {
    let (pool, db_name) = create_test_db().await;
    let (task_id, _) = seed(&pool).await;
    use MealPlanTaskStatus::*;

    change_task_status(&pool, &task_id, Unfinished, Cancelled, "not needed")
        .await
        .unwrap();
    let reopened = change_task_status(&pool, &task_id, Cancelled, Unfinished, "needed after all")
        .await
        .unwrap();
    assert_eq!(reopened.status, Unfinished);
    assert!(reopened.completed_at.is_none());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stale_and_invalid_transitions_are_rejected() {
    let (pool, db_name) = create_test_db().await;
    let (task_id, _) = seed(&pool).await;
    use MealPlanTaskStatus::*;

    // Stored status is `unfinished`, caller believes `in_progress`.
    let err = change_task_status(&pool, &task_id, InProgress, Finished, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert!(err.to_string().contains("optimistic lock failed"));

    let err = change_task_status(&pool, &task_id, Unfinished, Unfinished, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    change_task_status(&pool, &task_id, Unfinished, Finished, "")
        .await
        .unwrap();
    // `finished` has no outgoing edges.
    let err = change_task_status(&pool, &task_id, Finished, Unfinished, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    let stored = meal_plan_tasks::get_task(&pool, &task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, Finished);

    let err = change_task_status(&pool, "missing", Unfinished, InProgress, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn grocery_item_updates() {
    let (pool, db_name) = create_test_db().await;
    let (_, item_id) = seed(&pool).await;

    let needs = update_grocery_item(
        &pool,
        &item_id,
        &GroceryItemUpdate {
            status: Some(GroceryListItemStatus::NeedsPurchase),
            ..GroceryItemUpdate::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(needs.status, GroceryListItemStatus::NeedsPurchase);
    assert!((needs.min_qty_needed - 200.0).abs() < 1e-9);

    let err = update_grocery_item(
        &pool,
        &item_id,
        &GroceryItemUpdate {
            status: Some(GroceryListItemStatus::Purchased),
            ..GroceryItemUpdate::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let err = update_grocery_item(
        &pool,
        &item_id,
        &GroceryItemUpdate {
            purchase_price: Some(-1.0),
            ..GroceryItemUpdate::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let bought = update_grocery_item(
        &pool,
        &item_id,
        &GroceryItemUpdate {
            status: Some(GroceryListItemStatus::Purchased),
            purchased_qty: Some(250.0),
            purchased_unit_id: Some("g".into()),
            purchase_price: Some(1.25),
            status_explanation: Some("bag of onions".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(bought.status, GroceryListItemStatus::Purchased);
    assert_eq!(bought.purchased_qty, Some(250.0));
    assert_eq!(bought.purchased_unit_id.as_deref(), Some("g"));
    assert_eq!(bought.status_explanation, "bag of onions");

    let err = update_grocery_item(&pool, "missing", &GroceryItemUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    drop_test_db(&db_name).await;
}
