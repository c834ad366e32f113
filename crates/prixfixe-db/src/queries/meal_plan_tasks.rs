//! Database query functions for `meal_plan_tasks`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};

use crate::models::{MealPlanTask, MealPlanTaskStatus};

/// Insert generated task rows. Rows whose id already exists are skipped, so
/// re-running the scheduler with the same deterministic ids is a no-op.
///
/// Returns the number of rows actually inserted.
pub async fn create_many(conn: &mut PgConnection, rows: &[MealPlanTask]) -> Result<u64> {
    let mut inserted = 0;
    for t in rows {
        let result = sqlx::query(
            "INSERT INTO meal_plan_tasks \
             (id, meal_plan_id, meal_plan_option_id, recipe_prep_task_id, sequence, status, \
              status_explanation, creation_explanation, window_starts_at, window_ends_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&t.id)
        .bind(&t.meal_plan_id)
        .bind(&t.meal_plan_option_id)
        .bind(&t.recipe_prep_task_id)
        .bind(t.sequence)
        .bind(t.status)
        .bind(&t.status_explanation)
        .bind(&t.creation_explanation)
        .bind(t.window_starts_at)
        .bind(t.window_ends_at)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert meal plan task {}", t.id))?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Tasks for a plan in their persisted sequence.
pub async fn tasks_for_plan<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<Vec<MealPlanTask>> {
    let tasks = sqlx::query_as::<_, MealPlanTask>(
        "SELECT * FROM meal_plan_tasks WHERE meal_plan_id = $1 ORDER BY sequence, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plan tasks")?;

    Ok(tasks)
}

/// Fetch a single task.
pub async fn get_task<'e>(executor: impl PgExecutor<'e>, id: &str) -> Result<Option<MealPlanTask>> {
    let task = sqlx::query_as::<_, MealPlanTask>("SELECT * FROM meal_plan_tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal plan task")?;

    Ok(task)
}

/// Atomically transition a task's status with an optimistic lock on `from`.
///
/// Returns the number of rows affected (0 if the task is missing or its
/// status no longer matches `from`).
pub async fn transition_status<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
    from: MealPlanTaskStatus,
    to: MealPlanTaskStatus,
    explanation: &str,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE meal_plan_tasks \
         SET status = $3, status_explanation = $4, completed_at = $5 \
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(explanation)
    .bind(completed_at)
    .execute(executor)
    .await
    .context("failed to transition meal plan task status")?;

    Ok(result.rows_affected())
}
