//! Meal plan TOML parser with validation.
//!
//! Parses a meal plan file into a [`MealPlanToml`] and validates:
//! - The plan has at least one event and every event at least one option.
//! - `meal_name` values are valid enum variants.
//! - Each event starts before it ends and no two events overlap.
//! - Option meals are distinct within an event.

use std::collections::HashSet;

use prixfixe_db::models::MealName;
use thiserror::Error;

use super::toml_format::MealPlanToml;

/// Errors that can occur during meal plan parsing and validation.
#[derive(Debug, Error)]
pub enum MealPlanParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("meal plan must contain at least one event")]
    NoEvents,

    #[error("event {event} has no options")]
    NoOptions { event: usize },

    #[error(
        "invalid meal_name {value:?} on event {event} (expected breakfast, second_breakfast, brunch, lunch, supper, or dinner)"
    )]
    InvalidMealName { event: usize, value: String },

    #[error("event {event} does not start before it ends")]
    EmptyWindow { event: usize },

    #[error("events {first} and {second} overlap")]
    Overlap { first: usize, second: usize },

    #[error("meal {meal:?} is offered twice on event {event}")]
    DuplicateMeal { event: usize, meal: String },
}

/// Parse and validate a meal plan TOML string.
pub fn parse_meal_plan_toml(content: &str) -> Result<MealPlanToml, MealPlanParseError> {
    let plan: MealPlanToml = toml::from_str(content)?;
    validate(&plan)?;
    Ok(plan)
}

/// Validate an already-deserialized definition. Events are numbered from 1
/// in file order.
pub fn validate(plan: &MealPlanToml) -> Result<(), MealPlanParseError> {
    if plan.events.is_empty() {
        return Err(MealPlanParseError::NoEvents);
    }

    for (i, event) in plan.events.iter().enumerate() {
        let n = i + 1;
        if event.meal_name.parse::<MealName>().is_err() {
            return Err(MealPlanParseError::InvalidMealName {
                event: n,
                value: event.meal_name.clone(),
            });
        }
        if event.starts_at >= event.ends_at {
            return Err(MealPlanParseError::EmptyWindow { event: n });
        }
        if event.options.is_empty() {
            return Err(MealPlanParseError::NoOptions { event: n });
        }
        let mut meals = HashSet::new();
        for option in &event.options {
            if !meals.insert(option.meal.as_str()) {
                return Err(MealPlanParseError::DuplicateMeal {
                    event: n,
                    meal: option.meal.clone(),
                });
            }
        }
    }

    let mut order: Vec<usize> = (0..plan.events.len()).collect();
    order.sort_by_key(|&i| (plan.events[i].starts_at, i));
    for pair in order.windows(2) {
        let (a, b) = (&plan.events[pair[0]], &plan.events[pair[1]]);
        if b.starts_at < a.ends_at {
            let (first, second) = (pair[0].min(pair[1]) + 1, pair[0].max(pair[1]) + 1);
            return Err(MealPlanParseError::Overlap { first, second });
        }
    }

    Ok(())
}
