//! Meal plan definitions: TOML format, validation, and the service layer.

pub mod parser;
pub mod service;
pub mod toml_format;

pub use parser::{MealPlanParseError, parse_meal_plan_toml};
pub use service::{EventDetail, MealPlanDetail, create_meal_plan_from_toml, get_meal_plan_detail};
pub use toml_format::{EventToml, MealPlanToml, OptionToml, PlanMeta};
