//! TOML format types for meal plan definition files.
//!
//! These types map directly to the on-disk format and are deserialized via
//! `serde` + the `toml` crate. Timestamps are RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level structure of a meal plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MealPlanToml {
    pub plan: PlanMeta,
    #[serde(default)]
    pub events: Vec<EventToml>,
}

/// Plan-level metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    /// Owning household id.
    pub household: String,
    /// Ballots are accepted until this instant.
    pub voting_deadline: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
}

/// A single `[[events]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventToml {
    /// One of "breakfast", "second_breakfast", "brunch", "lunch", "supper",
    /// "dinner".
    pub meal_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub options: Vec<OptionToml>,
}

/// A candidate meal for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionToml {
    /// Meal id.
    pub meal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_cook: Option<String>,
    #[serde(default)]
    pub notes: String,
}
