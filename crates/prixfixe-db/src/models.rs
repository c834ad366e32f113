use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------
/// Status of a meal plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MealPlanStatus {
    AwaitingVotes,
    Finalized,
    FinalizationFailed,
}

impl fmt::Display for MealPlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingVotes => "awaiting_votes",
            Self::Finalized => "finalized",
            Self::FinalizationFailed => "finalization_failed",
        };
        f.write_str(s)
    }
}

impl FromStr for MealPlanStatus {
    type Err = MealPlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_votes" => Ok(Self::AwaitingVotes),
            "finalized" => Ok(Self::Finalized),
            "finalization_failed" => Ok(Self::FinalizationFailed),
            other => Err(MealPlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MealPlanStatus`] string.
#[derive(Debug, Clone)]
pub struct MealPlanStatusParseError(pub String);

impl fmt::Display for MealPlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid meal plan status: {:?}", self.0)
    }
}

impl std::error::Error for MealPlanStatusParseError {}

// ---------------------------------------------------------------------------
/// Which meal of the day an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MealName {
    Breakfast,
    SecondBreakfast,
    Brunch,
    Lunch,
    Supper,
    Dinner,
}

impl fmt::Display for MealName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Breakfast => "breakfast",
            Self::SecondBreakfast => "second_breakfast",
            Self::Brunch => "brunch",
            Self::Lunch => "lunch",
            Self::Supper => "supper",
            Self::Dinner => "dinner",
        };
        f.write_str(s)
    }
}

impl FromStr for MealName {
    type Err = MealNameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breakfast" => Ok(Self::Breakfast),
            "second_breakfast" => Ok(Self::SecondBreakfast),
            "brunch" => Ok(Self::Brunch),
            "lunch" => Ok(Self::Lunch),
            "supper" => Ok(Self::Supper),
            "dinner" => Ok(Self::Dinner),
            other => Err(MealNameParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MealName`] string.
#[derive(Debug, Clone)]
pub struct MealNameParseError(pub String);

impl fmt::Display for MealNameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid meal name: {:?}", self.0)
    }
}

impl std::error::Error for MealNameParseError {}

// ---------------------------------------------------------------------------
/// Role a recipe plays within a meal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Unspecified,
    AmuseBouche,
    Appetizer,
    Soup,
    Main,
    Salad,
    Beverage,
    Side,
    Dessert,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "unspecified",
            Self::AmuseBouche => "amuse_bouche",
            Self::Appetizer => "appetizer",
            Self::Soup => "soup",
            Self::Main => "main",
            Self::Salad => "salad",
            Self::Beverage => "beverage",
            Self::Side => "side",
            Self::Dessert => "dessert",
        };
        f.write_str(s)
    }
}

impl FromStr for ComponentType {
    type Err = ComponentTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(Self::Unspecified),
            "amuse_bouche" => Ok(Self::AmuseBouche),
            "appetizer" => Ok(Self::Appetizer),
            "soup" => Ok(Self::Soup),
            "main" => Ok(Self::Main),
            "salad" => Ok(Self::Salad),
            "beverage" => Ok(Self::Beverage),
            "side" => Ok(Self::Side),
            "dessert" => Ok(Self::Dessert),
            other => Err(ComponentTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ComponentType`] string.
#[derive(Debug, Clone)]
pub struct ComponentTypeParseError(pub String);

impl fmt::Display for ComponentTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid component type: {:?}", self.0)
    }
}

impl std::error::Error for ComponentTypeParseError {}

// ---------------------------------------------------------------------------
/// Role of a user within a household.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admin => "admin",
            Self::Member => "member",
        };
        f.write_str(s)
    }
}

impl FromStr for MemberRole {
    type Err = MemberRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(MemberRoleParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MemberRole`] string.
#[derive(Debug, Clone)]
pub struct MemberRoleParseError(pub String);

impl fmt::Display for MemberRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid member role: {:?}", self.0)
    }
}

impl std::error::Error for MemberRoleParseError {}

// ---------------------------------------------------------------------------
/// How the output of a prep task is stored until the main cook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Uncovered,
    Covered,
    Airtight,
    WireRack,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uncovered => "uncovered",
            Self::Covered => "covered",
            Self::Airtight => "airtight",
            Self::WireRack => "wire_rack",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageType {
    type Err = StorageTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncovered" => Ok(Self::Uncovered),
            "covered" => Ok(Self::Covered),
            "airtight" => Ok(Self::Airtight),
            "wire_rack" => Ok(Self::WireRack),
            other => Err(StorageTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StorageType`] string.
#[derive(Debug, Clone)]
pub struct StorageTypeParseError(pub String);

impl fmt::Display for StorageTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid storage type: {:?}", self.0)
    }
}

impl std::error::Error for StorageTypeParseError {}

// ---------------------------------------------------------------------------
/// What a recipe step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Ingredient,
    Instrument,
    Vessel,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ingredient => "ingredient",
            Self::Instrument => "instrument",
            Self::Vessel => "vessel",
        };
        f.write_str(s)
    }
}

impl FromStr for ProductKind {
    type Err = ProductKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingredient" => Ok(Self::Ingredient),
            "instrument" => Ok(Self::Instrument),
            "vessel" => Ok(Self::Vessel),
            other => Err(ProductKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProductKind`] string.
#[derive(Debug, Clone)]
pub struct ProductKindParseError(pub String);

impl fmt::Display for ProductKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid product kind: {:?}", self.0)
    }
}

impl std::error::Error for ProductKindParseError {}

// ---------------------------------------------------------------------------
/// Status of a generated meal plan task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MealPlanTaskStatus {
    Unfinished,
    InProgress,
    Cancelled,
    Finished,
}

impl fmt::Display for MealPlanTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unfinished => "unfinished",
            Self::InProgress => "in_progress",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

impl FromStr for MealPlanTaskStatus {
    type Err = MealPlanTaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfinished" => Ok(Self::Unfinished),
            "in_progress" => Ok(Self::InProgress),
            "cancelled" => Ok(Self::Cancelled),
            "finished" => Ok(Self::Finished),
            other => Err(MealPlanTaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MealPlanTaskStatus`] string.
#[derive(Debug, Clone)]
pub struct MealPlanTaskStatusParseError(pub String);

impl fmt::Display for MealPlanTaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid meal plan task status: {:?}", self.0)
    }
}

impl std::error::Error for MealPlanTaskStatusParseError {}

// ---------------------------------------------------------------------------
/// Purchase status of a grocery list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroceryListItemStatus {
    Unknown,
    AlreadyHave,
    NeedsPurchase,
    Purchased,
}

impl fmt::Display for GroceryListItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::AlreadyHave => "already_have",
            Self::NeedsPurchase => "needs_purchase",
            Self::Purchased => "purchased",
        };
        f.write_str(s)
    }
}

impl FromStr for GroceryListItemStatus {
    type Err = GroceryListItemStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "already_have" => Ok(Self::AlreadyHave),
            "needs_purchase" => Ok(Self::NeedsPurchase),
            "purchased" => Ok(Self::Purchased),
            other => Err(GroceryListItemStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GroceryListItemStatus`] string.
#[derive(Debug, Clone)]
pub struct GroceryListItemStatusParseError(pub String);

impl fmt::Display for GroceryListItemStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid grocery list item status: {:?}", self.0)
    }
}

impl std::error::Error for GroceryListItemStatusParseError {}

impl MealPlanStatus {
    /// `finalized` and `finalization_failed` are terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::AwaitingVotes)
    }
}

impl StorageType {
    /// Human-readable phrasing used in task explanations.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Uncovered => "uncovered",
            Self::Covered => "covered",
            Self::Airtight => "in an airtight container",
            Self::WireRack => "on a wire rack",
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs: households
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HouseholdMembership {
    pub household_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row structs: reference catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidMeasurementUnit {
    pub id: String,
    pub name: String,
    /// Universal units are the preferred canonical unit on grocery lists.
    pub universal: bool,
    pub metric: bool,
    pub imperial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidIngredient {
    pub id: String,
    pub name: String,
    pub is_liquid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidPreparation {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidInstrument {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidVessel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidIngredientState {
    pub id: String,
    pub name: String,
}

/// A directed conversion edge: `1 from_unit == modifier to_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ValidMeasurementUnitConversion {
    pub id: String,
    pub from_unit: String,
    pub to_unit: String,
    pub only_for_ingredient: Option<String>,
    pub modifier: f64,
}

// ---------------------------------------------------------------------------
// Row structs: recipes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub yields_portions_min: f64,
    pub yields_portions_max: Option<f64>,
    pub yields_component_type: ComponentType,
}

impl Default for Recipe {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            yields_portions_min: 1.0,
            yields_portions_max: None,
            yields_component_type: ComponentType::Main,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStep {
    pub id: String,
    pub recipe_id: String,
    pub step_index: i32,
    pub preparation_id: String,
    pub min_est_time_s: Option<i32>,
    pub max_est_time_s: Option<i32>,
    pub temperature_c: Option<f64>,
    pub notes: String,
    pub start_timer_automatically: bool,
    pub optional: bool,
}

/// An ingredient consumed by a step: either a catalog ingredient or the
/// product of an earlier step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStepIngredient {
    pub id: String,
    pub step_id: String,
    pub name: String,
    pub ingredient_id: Option<String>,
    pub product_of_step_index: Option<i32>,
    pub product_index: Option<i32>,
    pub measurement_unit_id: String,
    pub quantity_min: f64,
    pub quantity_max: Option<f64>,
    pub optional: bool,
    pub to_taste: bool,
    pub product_percentage_to_use: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStepInstrument {
    pub id: String,
    pub step_id: String,
    pub name: String,
    pub instrument_id: Option<String>,
    pub product_of_step_index: Option<i32>,
    pub product_index: Option<i32>,
    pub quantity_min: i32,
    pub quantity_max: Option<i32>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStepVessel {
    pub id: String,
    pub step_id: String,
    pub name: String,
    pub vessel_id: Option<String>,
    pub product_of_step_index: Option<i32>,
    pub product_index: Option<i32>,
    pub quantity_min: i32,
    pub quantity_max: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStepProduct {
    pub id: String,
    pub step_id: String,
    pub product_index: i32,
    pub name: String,
    pub kind: ProductKind,
    pub measurement_unit_id: Option<String>,
    pub quantity_min: Option<f64>,
    pub quantity_max: Option<f64>,
    pub storage_temperature_c: Option<f64>,
    pub storage_duration_s: Option<i32>,
    pub is_waste: bool,
    pub is_liquid: bool,
    pub contained_in_vessel_index: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipeStepCompletionCondition {
    pub id: String,
    pub step_id: String,
    pub ingredient_state_id: String,
    pub ingredient_indices: Vec<i32>,
    pub optional: bool,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipePrepTask {
    pub id: String,
    pub recipe_id: String,
    pub name: String,
    pub notes: String,
    pub storage_type: Option<StorageType>,
    pub storage_temperature_c: Option<f64>,
    pub buffer_min_s: i32,
    pub buffer_max_s: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecipePrepTaskStep {
    pub id: String,
    pub prep_task_id: String,
    pub step_id: String,
    /// Completing the prep task counts as completing this step.
    pub satisfies_recipe_step: bool,
}

// ---------------------------------------------------------------------------
// Row structs: meals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Meal {
    pub id: String,
    pub name: String,
    pub min_estimated_portions: f64,
    pub eligible_for_meal_plans: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MealComponent {
    pub meal_id: String,
    pub recipe_id: String,
    pub recipe_scale: f64,
    pub component_type: ComponentType,
}

// ---------------------------------------------------------------------------
// Row structs: meal plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlan {
    pub id: String,
    pub household_id: String,
    pub status: MealPlanStatus,
    pub status_explanation: String,
    pub notes: String,
    pub voting_deadline: DateTime<Utc>,
    pub tasks_created: bool,
    pub grocery_list_initialized: bool,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlanEvent {
    pub id: String,
    pub meal_plan_id: String,
    pub meal_name: MealName,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub notes: String,
    pub status_explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlanOption {
    pub id: String,
    pub event_id: String,
    pub meal_id: String,
    pub assigned_cook: Option<String>,
    pub notes: String,
    pub chosen: bool,
    pub tiebroken: bool,
    pub prep_explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlanOptionVote {
    pub id: String,
    pub option_id: String,
    pub event_id: String,
    pub voter_id: String,
    pub rank: i16,
    pub abstain: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlanTask {
    pub id: String,
    pub meal_plan_id: String,
    pub meal_plan_option_id: String,
    pub recipe_prep_task_id: String,
    pub sequence: i32,
    pub status: MealPlanTaskStatus,
    pub status_explanation: String,
    pub creation_explanation: String,
    pub window_starts_at: DateTime<Utc>,
    pub window_ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealPlanGroceryListItem {
    pub id: String,
    pub meal_plan_id: String,
    pub ingredient_id: String,
    pub measurement_unit_id: String,
    pub sequence: i32,
    pub min_qty_needed: f64,
    pub max_qty_needed: Option<f64>,
    pub purchased_qty: Option<f64>,
    pub purchased_unit_id: Option<String>,
    pub purchase_price: Option<f64>,
    pub status: GroceryListItemStatus,
    pub status_explanation: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
