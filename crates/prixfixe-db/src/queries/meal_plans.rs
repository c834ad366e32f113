//! Database query functions for `meal_plans`, `meal_plan_events`, and
//! `meal_plan_options`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgExecutor};

use crate::models::{MealPlan, MealPlanEvent, MealPlanOption, MealPlanStatus};

/// A household member who has not yet voted on an undecided event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct MissingVote {
    pub event_id: String,
    pub user_id: String,
}

/// Insert a plan with its events and options on an existing connection.
///
/// The caller owns the transaction.
pub async fn insert_meal_plan(
    conn: &mut PgConnection,
    plan: &MealPlan,
    events: &[MealPlanEvent],
    options: &[MealPlanOption],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO meal_plans (id, household_id, status, status_explanation, notes, voting_deadline) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&plan.id)
    .bind(&plan.household_id)
    .bind(plan.status)
    .bind(&plan.status_explanation)
    .bind(&plan.notes)
    .bind(plan.voting_deadline)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to insert meal plan {}", plan.id))?;

    for e in events {
        sqlx::query(
            "INSERT INTO meal_plan_events (id, meal_plan_id, meal_name, starts_at, ends_at, notes) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&e.id)
        .bind(&e.meal_plan_id)
        .bind(e.meal_name)
        .bind(e.starts_at)
        .bind(e.ends_at)
        .bind(&e.notes)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert meal plan event {}", e.id))?;
    }

    for o in options {
        sqlx::query(
            "INSERT INTO meal_plan_options (id, event_id, meal_id, assigned_cook, notes) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&o.id)
        .bind(&o.event_id)
        .bind(&o.meal_id)
        .bind(&o.assigned_cook)
        .bind(&o.notes)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert meal plan option {}", o.id))?;
    }

    Ok(())
}

/// Fetch a meal plan by id.
pub async fn get_meal_plan<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
) -> Result<Option<MealPlan>> {
    let plan = sqlx::query_as::<_, MealPlan>("SELECT * FROM meal_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal plan")?;

    Ok(plan)
}

/// List a household's plans, newest deadline first.
pub async fn list_meal_plans_for_household<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
) -> Result<Vec<MealPlan>> {
    let plans = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans WHERE household_id = $1 ORDER BY voting_deadline DESC, id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plans")?;

    Ok(plans)
}

/// Events of a plan in chronological order.
pub async fn events_for_plan<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<Vec<MealPlanEvent>> {
    let events = sqlx::query_as::<_, MealPlanEvent>(
        "SELECT * FROM meal_plan_events WHERE meal_plan_id = $1 ORDER BY starts_at, id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plan events")?;

    Ok(events)
}

/// Fetch a single event.
pub async fn get_event<'e>(
    executor: impl PgExecutor<'e>,
    event_id: &str,
) -> Result<Option<MealPlanEvent>> {
    let event = sqlx::query_as::<_, MealPlanEvent>("SELECT * FROM meal_plan_events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch meal plan event")?;

    Ok(event)
}

/// Every option of every event in a plan, ordered by event then option id.
pub async fn options_for_plan<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<Vec<MealPlanOption>> {
    let options = sqlx::query_as::<_, MealPlanOption>(
        "SELECT o.* FROM meal_plan_options o \
         JOIN meal_plan_events e ON e.id = o.event_id \
         WHERE e.meal_plan_id = $1 \
         ORDER BY e.starts_at, o.event_id, o.id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list meal plan options")?;

    Ok(options)
}

/// Options of one event ordered by id.
pub async fn options_for_event<'e>(
    executor: impl PgExecutor<'e>,
    event_id: &str,
) -> Result<Vec<MealPlanOption>> {
    let options = sqlx::query_as::<_, MealPlanOption>(
        "SELECT * FROM meal_plan_options WHERE event_id = $1 ORDER BY id",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await
    .context("failed to list event options")?;

    Ok(options)
}

/// Ids of plans ready for finalization, oldest deadline first.
///
/// A plan is ready when it is awaiting votes and either its deadline has
/// passed, or the household has at least one member and no member is missing
/// a ballot on any event that has no chosen option yet.
pub async fn list_due<'e>(
    executor: impl PgExecutor<'e>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT mp.id FROM meal_plans mp \
         WHERE mp.status = 'awaiting_votes' \
           AND (mp.voting_deadline <= $1 \
                OR (EXISTS (SELECT 1 FROM household_memberships hm \
                            WHERE hm.household_id = mp.household_id) \
                    AND NOT EXISTS ( \
                        SELECT 1 FROM meal_plan_events e \
                        JOIN household_memberships hm ON hm.household_id = mp.household_id \
                        WHERE e.meal_plan_id = mp.id \
                          AND NOT EXISTS (SELECT 1 FROM meal_plan_options o \
                                          WHERE o.event_id = e.id AND o.chosen) \
                          AND NOT EXISTS (SELECT 1 FROM meal_plan_option_votes v \
                                          WHERE v.event_id = e.id AND v.voter_id = hm.user_id)))) \
         ORDER BY mp.voting_deadline, mp.id \
         LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await
    .context("failed to list due meal plans")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Members with no ballot on an event that has no chosen option.
pub async fn missing_votes<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<Vec<MissingVote>> {
    let rows = sqlx::query_as::<_, MissingVote>(
        "SELECT e.id AS event_id, hm.user_id \
         FROM meal_plans mp \
         JOIN meal_plan_events e ON e.meal_plan_id = mp.id \
         JOIN household_memberships hm ON hm.household_id = mp.household_id \
         WHERE mp.id = $1 \
           AND NOT EXISTS (SELECT 1 FROM meal_plan_options o WHERE o.event_id = e.id AND o.chosen) \
           AND NOT EXISTS (SELECT 1 FROM meal_plan_option_votes v \
                           WHERE v.event_id = e.id AND v.voter_id = hm.user_id) \
         ORDER BY e.starts_at, e.id, hm.user_id",
    )
    .bind(plan_id)
    .fetch_all(executor)
    .await
    .context("failed to list missing votes")?;

    Ok(rows)
}

/// Move an `awaiting_votes` plan to `status`.
///
/// Returns `false` if the plan was not awaiting votes (already terminal or
/// missing); the row is left untouched in that case.
pub async fn set_status<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
    status: MealPlanStatus,
    explanation: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE meal_plans \
         SET status = $2, status_explanation = $3, \
             finalized_at = CASE WHEN $2 = 'awaiting_votes' THEN NULL ELSE now() END \
         WHERE id = $1 AND status = 'awaiting_votes'",
    )
    .bind(id)
    .bind(status)
    .bind(explanation)
    .execute(executor)
    .await
    .context("failed to update meal plan status")?;

    Ok(result.rows_affected() == 1)
}

pub async fn set_event_explanation<'e>(
    executor: impl PgExecutor<'e>,
    event_id: &str,
    explanation: &str,
) -> Result<()> {
    sqlx::query("UPDATE meal_plan_events SET status_explanation = $2 WHERE id = $1")
        .bind(event_id)
        .bind(explanation)
        .execute(executor)
        .await
        .context("failed to update event explanation")?;

    Ok(())
}

/// Mark an option as the event's winner.
pub async fn option_set_chosen<'e>(
    executor: impl PgExecutor<'e>,
    option_id: &str,
    tiebroken: bool,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE meal_plan_options SET chosen = true, tiebroken = $2 WHERE id = $1")
            .bind(option_id)
            .bind(tiebroken)
            .execute(executor)
            .await
            .context("failed to mark option chosen")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("meal plan option {option_id} not found");
    }

    Ok(())
}

pub async fn set_option_prep_explanation<'e>(
    executor: impl PgExecutor<'e>,
    option_id: &str,
    explanation: &str,
) -> Result<()> {
    sqlx::query("UPDATE meal_plan_options SET prep_explanation = $2 WHERE id = $1")
        .bind(option_id)
        .bind(explanation)
        .execute(executor)
        .await
        .context("failed to update option prep explanation")?;

    Ok(())
}

/// Finalized plans in a household whose tasks have not been generated.
pub async fn list_finalized_without_tasks<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
) -> Result<Vec<MealPlan>> {
    let plans = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans \
         WHERE household_id = $1 AND status = 'finalized' AND NOT tasks_created \
         ORDER BY voting_deadline, id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list plans needing tasks")?;

    Ok(plans)
}

/// Finalized plans in a household whose grocery list has not been built.
pub async fn list_finalized_without_grocery_list<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
) -> Result<Vec<MealPlan>> {
    let plans = sqlx::query_as::<_, MealPlan>(
        "SELECT * FROM meal_plans \
         WHERE household_id = $1 AND status = 'finalized' AND NOT grocery_list_initialized \
         ORDER BY voting_deadline, id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list plans needing a grocery list")?;

    Ok(plans)
}

/// Households that own at least one finalized plan with outstanding work.
pub async fn households_with_pending_work<'e>(
    executor: impl PgExecutor<'e>,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT household_id FROM meal_plans \
         WHERE status = 'finalized' AND (NOT tasks_created OR NOT grocery_list_initialized) \
         ORDER BY household_id",
    )
    .fetch_all(executor)
    .await
    .context("failed to list households with pending work")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn mark_tasks_created<'e>(executor: impl PgExecutor<'e>, plan_id: &str) -> Result<()> {
    sqlx::query("UPDATE meal_plans SET tasks_created = true WHERE id = $1")
        .bind(plan_id)
        .execute(executor)
        .await
        .context("failed to mark tasks created")?;

    Ok(())
}

pub async fn mark_grocery_list_initialized<'e>(
    executor: impl PgExecutor<'e>,
    plan_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE meal_plans SET grocery_list_initialized = true WHERE id = $1")
        .bind(plan_id)
        .execute(executor)
        .await
        .context("failed to mark grocery list initialized")?;

    Ok(())
}
