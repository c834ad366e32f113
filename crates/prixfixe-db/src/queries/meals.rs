//! Database query functions for `meals` and `meal_components`.

use anyhow::{Context, Result};
use sqlx::{PgExecutor, PgPool};

use crate::models::{Meal, MealComponent};

/// Insert a meal and its components in one transaction.
pub async fn insert_meal(pool: &PgPool, meal: &Meal, components: &[MealComponent]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin meal insert")?;

    sqlx::query(
        "INSERT INTO meals (id, name, min_estimated_portions, eligible_for_meal_plans) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&meal.id)
    .bind(&meal.name)
    .bind(meal.min_estimated_portions)
    .bind(meal.eligible_for_meal_plans)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to insert meal {}", meal.id))?;

    for c in components {
        sqlx::query(
            "INSERT INTO meal_components (meal_id, recipe_id, recipe_scale, component_type) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&meal.id)
        .bind(&c.recipe_id)
        .bind(c.recipe_scale)
        .bind(c.component_type)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert component {} of meal {}", c.recipe_id, meal.id))?;
    }

    tx.commit().await.context("failed to commit meal insert")?;
    Ok(())
}

/// Fetch a meal by id.
pub async fn get_meal<'e>(executor: impl PgExecutor<'e>, id: &str) -> Result<Option<Meal>> {
    let meal = sqlx::query_as::<_, Meal>("SELECT * FROM meals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal")?;

    Ok(meal)
}

/// Components of a meal, ordered by recipe id.
pub async fn components_for_meal<'e>(
    executor: impl PgExecutor<'e>,
    meal_id: &str,
) -> Result<Vec<MealComponent>> {
    let components = sqlx::query_as::<_, MealComponent>(
        "SELECT * FROM meal_components WHERE meal_id = $1 ORDER BY recipe_id",
    )
    .bind(meal_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal components")?;

    Ok(components)
}
