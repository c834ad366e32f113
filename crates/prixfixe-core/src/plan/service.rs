//! Meal plan service layer.
//!
//! Creates a plan from a validated TOML definition, inserting the plan row,
//! events, and options within a single database transaction, and assembles
//! the plan detail view.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use prixfixe_db::ids::new_id;
use prixfixe_db::models::{MealName, MealPlan, MealPlanEvent, MealPlanOption, MealPlanStatus};
use prixfixe_db::queries::{households, meal_plans, meals};

use super::parser::validate;
use super::toml_format::MealPlanToml;
use crate::error::{EngineError, EngineResult};

/// Create a plan, its events, and their options from a [`MealPlanToml`].
///
/// Everything is inserted in one transaction. An unknown household or meal
/// rolls back with `not_found`; a meal not eligible for meal plans rolls back
/// with `invalid_input`.
pub async fn create_meal_plan_from_toml(
    pool: &PgPool,
    definition: &MealPlanToml,
) -> EngineResult<MealPlan> {
    validate(definition).map_err(|e| EngineError::InvalidInput(e.to_string()))?;

    let mut tx = pool.begin().await?;

    let household_id = &definition.plan.household;
    if households::get_household(&mut *tx, household_id).await?.is_none() {
        return Err(EngineError::not_found(format!("household {household_id}")));
    }

    let plan = MealPlan {
        id: new_id(),
        household_id: household_id.clone(),
        status: MealPlanStatus::AwaitingVotes,
        status_explanation: String::new(),
        notes: definition.plan.notes.clone(),
        voting_deadline: definition.plan.voting_deadline,
        tasks_created: false,
        grocery_list_initialized: false,
        created_at: Utc::now(),
        finalized_at: None,
    };

    let mut events = Vec::with_capacity(definition.events.len());
    let mut options = Vec::new();
    for event_toml in &definition.events {
        let meal_name: MealName = event_toml
            .meal_name
            .parse()
            .map_err(|e| EngineError::InvalidInput(format!("{e}")))?;
        let event = MealPlanEvent {
            id: new_id(),
            meal_plan_id: plan.id.clone(),
            meal_name,
            starts_at: event_toml.starts_at,
            ends_at: event_toml.ends_at,
            notes: event_toml.notes.clone(),
            status_explanation: String::new(),
        };

        for option_toml in &event_toml.options {
            let meal = meals::get_meal(&mut *tx, &option_toml.meal)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("meal {}", option_toml.meal)))?;
            if !meal.eligible_for_meal_plans {
                return Err(EngineError::InvalidInput(format!(
                    "meal {} is not eligible for meal plans",
                    meal.id
                )));
            }
            options.push(MealPlanOption {
                id: new_id(),
                event_id: event.id.clone(),
                meal_id: meal.id,
                assigned_cook: option_toml.assigned_cook.clone(),
                notes: option_toml.notes.clone(),
                chosen: false,
                tiebroken: false,
                prep_explanation: String::new(),
            });
        }
        events.push(event);
    }

    meal_plans::insert_meal_plan(&mut *tx, &plan, &events, &options).await?;
    tx.commit().await?;

    info!(
        plan_id = %plan.id,
        household_id = %plan.household_id,
        events = events.len(),
        options = options.len(),
        "meal plan created"
    );
    Ok(plan)
}

/// A plan with its events and their options.
#[derive(Debug, Clone, Serialize)]
pub struct MealPlanDetail {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub events: Vec<EventDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: MealPlanEvent,
    pub options: Vec<MealPlanOption>,
}

/// Fetch a plan with its events (chronological) and options.
pub async fn get_meal_plan_detail(pool: &PgPool, plan_id: &str) -> EngineResult<MealPlanDetail> {
    let plan = meal_plans::get_meal_plan(pool, plan_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("meal plan {plan_id}")))?;

    let mut options = meal_plans::options_for_plan(pool, plan_id).await?;
    let events = meal_plans::events_for_plan(pool, plan_id)
        .await?
        .into_iter()
        .map(|event| {
            let (mine, rest): (Vec<_>, Vec<_>) =
                options.drain(..).partition(|o| o.event_id == event.id);
            options = rest;
            EventDetail {
                event,
                options: mine,
            }
        })
        .collect();

    Ok(MealPlanDetail { plan, events })
}
