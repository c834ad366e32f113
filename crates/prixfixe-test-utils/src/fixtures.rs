//! Row builders for integration and unit tests.
//!
//! Builders produce plain row structs so pure-logic tests can use them
//! without a database; the `insert` helpers persist them.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use prixfixe_db::models::{
    ComponentType, Meal, MealComponent, MealName, MealPlan, MealPlanEvent, MealPlanOption,
    MealPlanStatus, MemberRole, ProductKind, Recipe, RecipePrepTask, RecipePrepTaskStep,
    RecipeStep, RecipeStepIngredient, RecipeStepProduct, StorageType, ValidIngredient,
    ValidMeasurementUnit, ValidMeasurementUnitConversion, ValidPreparation,
};
use prixfixe_db::queries::recipes::RecipeRows;
use prixfixe_db::queries::{catalog, households, meal_plans, meals, recipes};

pub const PREP_ID: &str = "prep-generic";

/// Insert a household whose first member is an admin.
pub async fn household(pool: &PgPool, id: &str, members: &[&str]) -> String {
    households::insert_household(pool, id, id)
        .await
        .expect("insert household");
    for (i, user) in members.iter().enumerate() {
        let role = if i == 0 {
            MemberRole::Admin
        } else {
            MemberRole::Member
        };
        households::add_member(pool, id, user, role)
            .await
            .expect("add member");
    }
    id.to_owned()
}

pub fn unit(id: &str, name: &str, universal: bool) -> ValidMeasurementUnit {
    ValidMeasurementUnit {
        id: id.to_owned(),
        name: name.to_owned(),
        universal,
        metric: universal,
        imperial: !universal,
    }
}

pub fn ingredient(id: &str, name: &str) -> ValidIngredient {
    ValidIngredient {
        id: id.to_owned(),
        name: name.to_owned(),
        is_liquid: false,
    }
}

pub fn conversion(
    id: &str,
    from: &str,
    to: &str,
    modifier: f64,
    only_for: Option<&str>,
) -> ValidMeasurementUnitConversion {
    ValidMeasurementUnitConversion {
        id: id.to_owned(),
        from_unit: from.to_owned(),
        to_unit: to.to_owned(),
        only_for_ingredient: only_for.map(str::to_owned),
        modifier,
    }
}

/// Seed the catalog rows most tests need: grams, pounds (`lb -> g`),
/// a generic preparation, and the given ingredients.
pub async fn basic_catalog(pool: &PgPool, ingredients: &[(&str, &str)]) {
    catalog::insert_unit(pool, &unit("g", "gram", true))
        .await
        .expect("insert unit g");
    catalog::insert_unit(pool, &unit("lb", "pound", false))
        .await
        .expect("insert unit lb");
    catalog::insert_conversion(pool, &conversion("conv-lb-g", "lb", "g", 453.592, None))
        .await
        .expect("insert conversion");
    catalog::insert_preparation(
        pool,
        &ValidPreparation {
            id: PREP_ID.to_owned(),
            name: "prepare".to_owned(),
        },
    )
    .await
    .expect("insert preparation");
    for (id, name) in ingredients {
        catalog::insert_ingredient(pool, &ingredient(id, name))
            .await
            .expect("insert ingredient");
    }
}

/// Fluent builder for a recipe graph.
///
/// Child row ids are derived from the recipe id and step index so tests can
/// refer to them without bookkeeping: step `n` of recipe `r` is `r-s{n}`.
#[derive(Debug, Clone)]
pub struct RecipeBuilder {
    rows: RecipeRows,
}

impl RecipeBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            rows: RecipeRows {
                recipe: Recipe {
                    id: id.to_owned(),
                    name: id.to_owned(),
                    yields_portions_min: 1.0,
                    yields_portions_max: None,
                    yields_component_type: ComponentType::Main,
                },
                ..RecipeRows::default()
            },
        }
    }

    pub fn step_id(recipe_id: &str, index: i32) -> String {
        format!("{recipe_id}-s{index}")
    }

    fn own_step_id(&self, index: i32) -> String {
        Self::step_id(&self.rows.recipe.id, index)
    }

    pub fn portions(mut self, min: f64) -> Self {
        self.rows.recipe.yields_portions_min = min;
        self
    }

    pub fn supporting(mut self, recipe_id: &str) -> Self {
        self.rows.supporting_recipe_ids.push(recipe_id.to_owned());
        self
    }

    pub fn step(mut self, index: i32) -> Self {
        let id = self.own_step_id(index);
        self.rows.steps.push(RecipeStep {
            id,
            recipe_id: self.rows.recipe.id.clone(),
            step_index: index,
            preparation_id: PREP_ID.to_owned(),
            min_est_time_s: None,
            max_est_time_s: None,
            temperature_c: None,
            notes: String::new(),
            start_timer_automatically: false,
            optional: false,
        });
        self
    }

    /// A catalog ingredient consumed by step `index`.
    pub fn ingredient(
        mut self,
        index: i32,
        ingredient_id: &str,
        unit_id: &str,
        min: f64,
        max: Option<f64>,
    ) -> Self {
        let step_id = self.own_step_id(index);
        let n = self.rows.ingredients.len();
        self.rows.ingredients.push(RecipeStepIngredient {
            id: format!("{step_id}-i{n}"),
            step_id,
            name: ingredient_id.to_owned(),
            ingredient_id: Some(ingredient_id.to_owned()),
            product_of_step_index: None,
            product_index: None,
            measurement_unit_id: unit_id.to_owned(),
            quantity_min: min,
            quantity_max: max,
            optional: false,
            to_taste: false,
            product_percentage_to_use: None,
        });
        self
    }

    /// Set `product_percentage_to_use` on the most recently added ingredient.
    pub fn percentage(mut self, pct: f64) -> Self {
        if let Some(last) = self.rows.ingredients.last_mut() {
            last.product_percentage_to_use = Some(pct);
        }
        self
    }

    /// Step `index` consumes product `product_index` of step `of_step`.
    pub fn uses_product(
        mut self,
        index: i32,
        of_step: i32,
        product_index: i32,
        unit_id: &str,
    ) -> Self {
        let step_id = self.own_step_id(index);
        let n = self.rows.ingredients.len();
        self.rows.ingredients.push(RecipeStepIngredient {
            id: format!("{step_id}-i{n}"),
            step_id,
            name: format!("product {of_step}.{product_index}"),
            ingredient_id: None,
            product_of_step_index: Some(of_step),
            product_index: Some(product_index),
            measurement_unit_id: unit_id.to_owned(),
            quantity_min: 1.0,
            quantity_max: None,
            optional: false,
            to_taste: false,
            product_percentage_to_use: None,
        });
        self
    }

    pub fn product(mut self, index: i32, product_index: i32, name: &str) -> Self {
        let step_id = self.own_step_id(index);
        self.rows.products.push(RecipeStepProduct {
            id: format!("{step_id}-p{product_index}"),
            step_id,
            product_index,
            name: name.to_owned(),
            kind: ProductKind::Ingredient,
            measurement_unit_id: None,
            quantity_min: None,
            quantity_max: None,
            storage_temperature_c: None,
            storage_duration_s: None,
            is_waste: false,
            is_liquid: false,
            contained_in_vessel_index: None,
        });
        self
    }

    /// A prep task with a buffer of `min_s..max_s` seconds before cooking.
    pub fn prep_task(mut self, id: &str, name: &str, min_s: i32, max_s: Option<i32>) -> Self {
        self.rows.prep_tasks.push(RecipePrepTask {
            id: id.to_owned(),
            recipe_id: self.rows.recipe.id.clone(),
            name: name.to_owned(),
            notes: String::new(),
            storage_type: None,
            storage_temperature_c: None,
            buffer_min_s: min_s,
            buffer_max_s: max_s,
        });
        self
    }

    /// Set storage details on the most recently added prep task.
    pub fn storage(mut self, storage_type: StorageType, temperature_c: Option<f64>) -> Self {
        if let Some(last) = self.rows.prep_tasks.last_mut() {
            last.storage_type = Some(storage_type);
            last.storage_temperature_c = temperature_c;
        }
        self
    }

    pub fn task_step(mut self, task_id: &str, index: i32, satisfies: bool) -> Self {
        let step_id = self.own_step_id(index);
        self.rows.prep_task_steps.push(RecipePrepTaskStep {
            id: format!("{task_id}-{step_id}"),
            prep_task_id: task_id.to_owned(),
            step_id,
            satisfies_recipe_step: satisfies,
        });
        self
    }

    pub fn build(self) -> RecipeRows {
        self.rows
    }

    pub async fn insert(self, pool: &PgPool) -> RecipeRows {
        recipes::insert_recipe(pool, &self.rows)
            .await
            .expect("insert recipe");
        self.rows
    }
}

/// Insert a meal made of `(recipe_id, scale)` components.
pub async fn meal(pool: &PgPool, id: &str, portions: f64, components: &[(&str, f64)]) -> Meal {
    let meal = Meal {
        id: id.to_owned(),
        name: id.to_owned(),
        min_estimated_portions: portions,
        eligible_for_meal_plans: true,
    };
    let components: Vec<MealComponent> = components
        .iter()
        .map(|(recipe_id, scale)| MealComponent {
            meal_id: id.to_owned(),
            recipe_id: (*recipe_id).to_owned(),
            recipe_scale: *scale,
            component_type: ComponentType::Main,
        })
        .collect();
    meals::insert_meal(pool, &meal, &components)
        .await
        .expect("insert meal");
    meal
}

/// Builder for a meal plan with events and options.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    plan: MealPlan,
    events: Vec<MealPlanEvent>,
    options: Vec<MealPlanOption>,
}

impl PlanBuilder {
    pub fn new(id: &str, household_id: &str, voting_deadline: DateTime<Utc>) -> Self {
        Self {
            plan: MealPlan {
                id: id.to_owned(),
                household_id: household_id.to_owned(),
                status: MealPlanStatus::AwaitingVotes,
                status_explanation: String::new(),
                notes: String::new(),
                voting_deadline,
                tasks_created: false,
                grocery_list_initialized: false,
                created_at: Utc::now(),
                finalized_at: None,
            },
            events: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Add a dinner event starting at `starts_at` offering `(option_id, meal_id)` pairs.
    pub fn event(
        mut self,
        id: &str,
        starts_at: DateTime<Utc>,
        options: &[(&str, &str)],
    ) -> Self {
        self.events.push(MealPlanEvent {
            id: id.to_owned(),
            meal_plan_id: self.plan.id.clone(),
            meal_name: MealName::Dinner,
            starts_at,
            ends_at: starts_at + Duration::hours(1),
            notes: String::new(),
            status_explanation: String::new(),
        });
        for (option_id, meal_id) in options {
            self.options.push(MealPlanOption {
                id: (*option_id).to_owned(),
                event_id: id.to_owned(),
                meal_id: (*meal_id).to_owned(),
                assigned_cook: None,
                notes: String::new(),
                chosen: false,
                tiebroken: false,
                prep_explanation: String::new(),
            });
        }
        self
    }

    pub async fn insert(self, pool: &PgPool) -> String {
        let mut tx = pool.begin().await.expect("begin plan insert");
        meal_plans::insert_meal_plan(&mut *tx, &self.plan, &self.events, &self.options)
            .await
            .expect("insert meal plan");
        tx.commit().await.expect("commit plan insert");
        self.plan.id
    }
}
