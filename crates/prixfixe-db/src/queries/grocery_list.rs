//! Database query functions for `meal_plan_grocery_list_items`.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor};

use crate::models::{GroceryListItemStatus, MealPlanGroceryListItem};

/// Explicit field updates for a grocery item. `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct GroceryItemUpdate {
    pub status: Option<GroceryListItemStatus>,
    pub purchased_qty: Option<f64>,
    pub purchased_unit_id: Option<String>,
    pub purchase_price: Option<f64>,
    pub status_explanation: Option<String>,
}

/// Delete the plan's current grocery list and insert `rows` in its place.
///
/// Must run inside a transaction.
pub async fn replace_for_plan(
    conn: &mut PgConnection,
    plan_id: &str,
    rows: &[MealPlanGroceryListItem],
) -> Result<()> {
    sqlx::query("DELETE FROM meal_plan_grocery_list_items WHERE meal_plan_id = $1")
        .bind(plan_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear grocery list")?;

    for item in rows {
        sqlx::query(
            "INSERT INTO meal_plan_grocery_list_items \
             (id, meal_plan_id, ingredient_id, measurement_unit_id, sequence, min_qty_needed, \
              max_qty_needed, purchased_qty, purchased_unit_id, purchase_price, status, \
              status_explanation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&item.id)
        .bind(&item.meal_plan_id)
        .bind(&item.ingredient_id)
        .bind(&item.measurement_unit_id)
        .bind(item.sequence)
        .bind(item.min_qty_needed)
        .bind(item.max_qty_needed)
        .bind(item.purchased_qty)
        .bind(&item.purchased_unit_id)
        .bind(item.purchase_price)
        .bind(item.status)
        .bind(&item.status_explanation)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert grocery list item {}", item.id))?;
    }

    Ok(())
}

/// Items for a plan in their persisted order.
pub async fn items_for_plan<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<Vec<MealPlanGroceryListItem>> {
    let items = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "SELECT * FROM meal_plan_grocery_list_items WHERE meal_plan_id = $1 ORDER BY sequence, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list grocery list items")?;

    Ok(items)
}

/// Fetch a single grocery item.
pub async fn get_item<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
) -> Result<Option<MealPlanGroceryListItem>> {
    let item = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "SELECT * FROM meal_plan_grocery_list_items WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch grocery list item")?;

    Ok(item)
}

/// Apply `update` to an item. Returns the updated row, or `None` if the item
/// does not exist.
pub async fn update_item<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
    update: &GroceryItemUpdate,
) -> Result<Option<MealPlanGroceryListItem>> {
    let item = sqlx::query_as::<_, MealPlanGroceryListItem>(
        "UPDATE meal_plan_grocery_list_items SET \
             status = COALESCE($2, status), \
             purchased_qty = COALESCE($3, purchased_qty), \
             purchased_unit_id = COALESCE($4, purchased_unit_id), \
             purchase_price = COALESCE($5, purchase_price), \
             status_explanation = COALESCE($6, status_explanation) \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(update.status)
    .bind(update.purchased_qty)
    .bind(&update.purchased_unit_id)
    .bind(update.purchase_price)
    .bind(&update.status_explanation)
    .fetch_optional(executor)
    .await
    .context("failed to update grocery list item")?;

    Ok(item)
}
