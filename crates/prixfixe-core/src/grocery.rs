//! Grocery list builder.
//!
//! Unfolds the chosen options of a finalized plan into recipe demands,
//! converts each ingredient's demands into one canonical unit where the
//! catalog allows, and sums them into list items.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use prixfixe_db::ids::id_from_key;
use prixfixe_db::models::{GroceryListItemStatus, MealPlanGroceryListItem, MealPlanStatus};
use prixfixe_db::queries::grocery_list::{self, GroceryItemUpdate};
use prixfixe_db::queries::{meal_plans, meals};

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventBus};
use crate::finalize::lock_plan;
use crate::recipe::{RecipeClosure, RecipeGraph, load_recipe_closure};

/// A recipe together with the factor its quantities are multiplied by.
#[derive(Debug, Clone, Copy)]
pub struct ScaledRecipe<'a> {
    pub graph: &'a RecipeGraph,
    pub scale: f64,
}

/// Quantity of one catalog ingredient required by one recipe step.
#[derive(Debug, Clone, PartialEq)]
pub struct Demand {
    pub ingredient_id: String,
    pub unit_id: String,
    pub min_qty: f64,
    pub max_qty: Option<f64>,
}

/// One aggregated line before it becomes a row.
#[derive(Debug, Clone, PartialEq)]
pub struct GroceryLine {
    pub ingredient_id: String,
    pub unit_id: String,
    pub min_qty: f64,
    pub max_qty: Option<f64>,
}

/// Scale applied to a meal component so it feeds the meal's portions.
///
/// `recipe_scale * meal_portions / recipe_yield`, with the portion factor
/// falling back to 1 when either side is not positive.
pub fn component_scale(recipe_scale: f64, meal_portions: f64, recipe_yield: f64) -> f64 {
    let portions = if meal_portions > 0.0 && recipe_yield > 0.0 {
        meal_portions / recipe_yield
    } else {
        1.0
    };
    recipe_scale * portions
}

/// Every supporting recipe of a component inherits the component's scale.
pub fn unfold<'a>(closure: &'a RecipeClosure, scale: f64) -> impl Iterator<Item = ScaledRecipe<'a>> {
    closure.iter().map(move |graph| ScaledRecipe { graph, scale })
}

/// Shopping demands of the given recipes.
///
/// Ingredients made by an earlier step are not bought and are skipped.
/// `product_percentage_to_use` scales both bounds.
pub fn collect_demands(recipes: &[ScaledRecipe<'_>]) -> Vec<Demand> {
    let mut out = Vec::new();
    for r in recipes {
        for step in r.graph.steps() {
            for ing in r.graph.ingredients_of(step.step_index) {
                if ing.product_of_step_index.is_some() {
                    continue;
                }
                let Some(ingredient_id) = &ing.ingredient_id else {
                    continue;
                };
                let factor = r.scale * ing.product_percentage_to_use.map_or(1.0, |p| p / 100.0);
                out.push(Demand {
                    ingredient_id: ingredient_id.clone(),
                    unit_id: ing.measurement_unit_id.clone(),
                    min_qty: ing.quantity_min * factor,
                    max_qty: ing.quantity_max.map(|q| q * factor),
                });
            }
        }
    }
    out
}

/// Canonical unit among `units`: the most frequent universal unit if any is
/// universal, else the most frequent unit. Ties go to the smaller id.
pub fn canonical_unit<'a>(catalog: &Catalog, units: &[&'a str]) -> Option<&'a str> {
    let mut counts: BTreeMap<&'a str, usize> = BTreeMap::new();
    for &u in units {
        *counts.entry(u).or_default() += 1;
    }
    let any_universal = counts.keys().any(|u| catalog.is_universal(u));
    counts
        .into_iter()
        .filter(|(u, _)| !any_universal || catalog.is_universal(u))
        // Ids ascend, so the first maximum wins ties.
        .fold(None, |best: Option<(&str, usize)>, (u, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((u, n)),
        })
        .map(|(u, _)| u)
}

/// Convert, group, and sum demands into sorted lines.
pub fn aggregate(catalog: &Catalog, demands: &[Demand]) -> Vec<GroceryLine> {
    let mut by_ingredient: BTreeMap<&str, Vec<&Demand>> = BTreeMap::new();
    for d in demands {
        by_ingredient.entry(&d.ingredient_id).or_default().push(d);
    }

    #[derive(Default)]
    struct Acc {
        min: f64,
        max: f64,
        has_max: bool,
    }

    let mut groups: BTreeMap<(&str, &str), Acc> = BTreeMap::new();
    for (&ingredient_id, ds) in &by_ingredient {
        let units: Vec<&str> = ds.iter().map(|d| d.unit_id.as_str()).collect();
        let canonical = canonical_unit(catalog, &units);

        for &d in ds {
            let (unit, factor) = match canonical
                .and_then(|c| catalog.convert(&d.unit_id, c, Some(ingredient_id)).map(|m| (c, m)))
            {
                Some((c, m)) => (c, m),
                None => (d.unit_id.as_str(), 1.0),
            };
            let acc = groups.entry((ingredient_id, unit)).or_default();
            acc.min += d.min_qty * factor;
            acc.max += d.max_qty.unwrap_or(d.min_qty) * factor;
            acc.has_max |= d.max_qty.is_some();
        }
    }

    let mut lines: Vec<GroceryLine> = groups
        .into_iter()
        .map(|((ingredient_id, unit_id), acc)| GroceryLine {
            ingredient_id: ingredient_id.to_owned(),
            unit_id: unit_id.to_owned(),
            min_qty: acc.min,
            max_qty: acc.has_max.then_some(acc.max),
        })
        .collect();

    let ingredient_name = |id: &str| catalog.ingredient(id).map_or(id.to_owned(), |i| i.name.clone());
    let unit_name = |id: &str| catalog.unit(id).map_or(id.to_owned(), |u| u.name.clone());
    lines.sort_by_cached_key(|l| {
        (
            ingredient_name(&l.ingredient_id),
            unit_name(&l.unit_id),
            l.ingredient_id.clone(),
            l.unit_id.clone(),
        )
    });
    lines
}

/// Rows for the plan's list, in order, with ids derived from the natural key.
pub fn list_items(
    plan_id: &str,
    lines: Vec<GroceryLine>,
    now: DateTime<Utc>,
) -> Vec<MealPlanGroceryListItem> {
    lines
        .into_iter()
        .enumerate()
        .map(|(i, l)| MealPlanGroceryListItem {
            id: id_from_key(&["grocery", plan_id, &l.ingredient_id, &l.unit_id]),
            meal_plan_id: plan_id.to_owned(),
            ingredient_id: l.ingredient_id,
            measurement_unit_id: l.unit_id,
            sequence: i32::try_from(i).unwrap_or(i32::MAX),
            min_qty_needed: l.min_qty,
            max_qty_needed: l.max_qty,
            purchased_qty: None,
            purchased_unit_id: None,
            purchase_price: None,
            status: GroceryListItemStatus::Unknown,
            status_explanation: String::new(),
            created_at: now,
        })
        .collect()
}

/// Build and store the grocery list of a finalized plan, replacing any
/// earlier list. Returns the number of items.
pub async fn initialize_grocery_list(
    pool: &PgPool,
    catalog: &Catalog,
    events: &EventBus,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<usize> {
    let mut tx = pool.begin().await?;
    let items = build_locked(&mut *tx, catalog, plan_id, now).await?;
    grocery_list::replace_for_plan(&mut *tx, plan_id, &items).await?;
    meal_plans::mark_grocery_list_initialized(&mut *tx, plan_id).await?;
    tx.commit().await?;

    info!(plan_id, count = items.len(), "grocery list initialized");
    events.publish(DomainEvent::GroceryInitialized {
        plan_id: plan_id.to_owned(),
        count: items.len(),
    });
    Ok(items.len())
}

async fn build_locked(
    conn: &mut PgConnection,
    catalog: &Catalog,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Vec<MealPlanGroceryListItem>> {
    lock_plan(&mut *conn, plan_id).await?;

    let plan = meal_plans::get_meal_plan(&mut *conn, plan_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("meal plan {plan_id}")))?;
    if plan.status != MealPlanStatus::Finalized {
        return Err(EngineError::Conflict(format!(
            "meal plan {plan_id} is {}, a grocery list needs a finalized plan",
            plan.status
        )));
    }

    let mut closures: Vec<(RecipeClosure, f64)> = Vec::new();
    for option in meal_plans::options_for_plan(&mut *conn, plan_id)
        .await?
        .into_iter()
        .filter(|o| o.chosen)
    {
        let meal = meals::get_meal(&mut *conn, &option.meal_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("meal {}", option.meal_id)))?;
        for component in meals::components_for_meal(&mut *conn, &meal.id).await? {
            match load_recipe_closure(&mut *conn, &component.recipe_id, catalog).await {
                Ok(closure) => {
                    let scale = component_scale(
                        component.recipe_scale,
                        meal.min_estimated_portions,
                        closure.root().recipe().yields_portions_min,
                    );
                    closures.push((closure, scale));
                }
                Err(EngineError::InvalidRecipeGraph(err)) => {
                    warn!(
                        plan_id,
                        option_id = %option.id,
                        recipe_id = %component.recipe_id,
                        error = %err,
                        "leaving recipe off the grocery list"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    let scaled: Vec<ScaledRecipe<'_>> = closures
        .iter()
        .flat_map(|(closure, scale)| unfold(closure, *scale))
        .collect();
    let demands = collect_demands(&scaled);
    Ok(list_items(plan_id, aggregate(catalog, &demands), now))
}

/// Record purchase progress on a grocery item.
///
/// `purchased` requires a purchased quantity. Unknown items are `not_found`.
pub async fn update_grocery_item(
    pool: &PgPool,
    item_id: &str,
    update: &GroceryItemUpdate,
) -> EngineResult<MealPlanGroceryListItem> {
    if update.status == Some(GroceryListItemStatus::Purchased) && update.purchased_qty.is_none() {
        return Err(EngineError::InvalidInput(format!(
            "grocery item {item_id} cannot be marked purchased without a purchased quantity"
        )));
    }
    if update.purchased_qty.is_some_and(|q| q < 0.0) || update.purchase_price.is_some_and(|p| p < 0.0) {
        return Err(EngineError::InvalidInput(
            "purchased quantity and price must not be negative".into(),
        ));
    }

    grocery_list::update_item(pool, item_id, update)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("grocery list item {item_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prixfixe_test_utils::fixtures::{RecipeBuilder, conversion, ingredient, unit};
    use proptest::prelude::*;

    fn catalog() -> Catalog {
        Catalog::builder()
            .unit(unit("g", "gram", true))
            .unit(unit("kg", "kilogram", true))
            .unit(unit("lb", "pound", false))
            .unit(unit("cup", "cup", false))
            .unit(unit("pinch", "pinch", false))
            .ingredient(ingredient("butter", "butter"))
            .ingredient(ingredient("flour", "flour"))
            .ingredient(ingredient("salt", "salt"))
            .conversion(conversion("c1", "lb", "g", 453.592, None))
            .conversion(conversion("c2", "kg", "g", 1000.0, None))
            .conversion(conversion("c3", "cup", "g", 125.0, Some("flour")))
            .build()
            .unwrap()
    }

    fn demand(ingredient_id: &str, unit_id: &str, min: f64, max: Option<f64>) -> Demand {
        Demand {
            ingredient_id: ingredient_id.into(),
            unit_id: unit_id.into(),
            min_qty: min,
            max_qty: max,
        }
    }

    #[test]
    fn butter_in_grams_and_pounds_sums_in_grams() {
        let r1 = RecipeGraph::build(
            RecipeBuilder::new("r1")
                .step(0)
                .ingredient(0, "butter", "g", 100.0, None)
                .build(),
            None,
        )
        .unwrap();
        let r2 = RecipeGraph::build(
            RecipeBuilder::new("r2")
                .step(0)
                .ingredient(0, "butter", "lb", 0.25, None)
                .build(),
            None,
        )
        .unwrap();
        let demands = collect_demands(&[
            ScaledRecipe { graph: &r1, scale: 1.0 },
            ScaledRecipe { graph: &r2, scale: 1.0 },
        ]);
        let lines = aggregate(&catalog(), &demands);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].ingredient_id, "butter");
        assert_eq!(lines[0].unit_id, "g");
        assert!((lines[0].min_qty - 213.398).abs() < 1e-6, "{}", lines[0].min_qty);
        assert_eq!(lines[0].max_qty, None);
    }

    #[test]
    fn products_of_earlier_steps_are_not_bought() {
        let g = RecipeGraph::build(
            RecipeBuilder::new("r")
                .step(0)
                .ingredient(0, "flour", "g", 200.0, None)
                .product(0, 0, "dough")
                .step(1)
                .uses_product(1, 0, 0, "g")
                .build(),
            None,
        )
        .unwrap();
        let demands = collect_demands(&[ScaledRecipe { graph: &g, scale: 1.0 }]);
        assert_eq!(demands, vec![demand("flour", "g", 200.0, None)]);
    }

    #[test]
    fn percentage_and_scale_apply_to_both_bounds() {
        let g = RecipeGraph::build(
            RecipeBuilder::new("r")
                .step(0)
                .ingredient(0, "flour", "g", 100.0, Some(200.0))
                .percentage(50.0)
                .build(),
            None,
        )
        .unwrap();
        let demands = collect_demands(&[ScaledRecipe { graph: &g, scale: 3.0 }]);
        assert_eq!(demands, vec![demand("flour", "g", 150.0, Some(300.0))]);
    }

    #[test]
    fn absent_max_counts_as_min_once_any_max_is_present() {
        let lines = aggregate(
            &catalog(),
            &[demand("flour", "g", 100.0, Some(150.0)), demand("flour", "g", 50.0, None)],
        );
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].min_qty, 150.0);
        assert_eq!(lines[0].max_qty, Some(200.0));
    }

    #[test]
    fn unconvertible_demand_keeps_native_unit() {
        let lines = aggregate(
            &catalog(),
            &[demand("salt", "g", 5.0, None), demand("salt", "pinch", 2.0, None)],
        );
        let units: Vec<&str> = lines.iter().map(|l| l.unit_id.as_str()).collect();
        assert_eq!(units, vec!["g", "pinch"]);
    }

    #[test]
    fn ingredient_scoped_edges_only_apply_to_their_ingredient() {
        let lines = aggregate(
            &catalog(),
            &[
                demand("flour", "cup", 2.0, None),
                demand("flour", "g", 10.0, None),
                demand("butter", "cup", 1.0, None),
                demand("butter", "g", 10.0, None),
            ],
        );
        let got: Vec<(&str, &str, f64)> = lines
            .iter()
            .map(|l| (l.ingredient_id.as_str(), l.unit_id.as_str(), l.min_qty))
            .collect();
        assert_eq!(
            got,
            vec![("butter", "cup", 1.0), ("butter", "g", 10.0), ("flour", "g", 260.0)]
        );
    }

    #[test]
    fn canonical_unit_prefers_universal_then_frequency_then_id() {
        let c = catalog();
        assert_eq!(canonical_unit(&c, &["lb", "lb", "g"]), Some("g"));
        assert_eq!(canonical_unit(&c, &["kg", "g"]), Some("g"));
        assert_eq!(canonical_unit(&c, &["kg", "kg", "g"]), Some("kg"));
        assert_eq!(canonical_unit(&c, &["pinch", "cup", "cup"]), Some("cup"));
        assert_eq!(canonical_unit(&c, &["pinch", "cup"]), Some("cup"));
        assert_eq!(canonical_unit(&c, &[]), None);
    }

    #[test]
    fn component_scale_covers_meal_portions() {
        assert_eq!(component_scale(1.0, 8.0, 4.0), 2.0);
        assert_eq!(component_scale(0.5, 8.0, 4.0), 1.0);
        assert_eq!(component_scale(2.0, 0.0, 4.0), 2.0);
        assert_eq!(component_scale(2.0, 4.0, 0.0), 2.0);
    }

    #[test]
    fn items_are_sorted_and_keyed() {
        let lines = aggregate(
            &catalog(),
            &[demand("salt", "g", 1.0, None), demand("butter", "g", 1.0, None)],
        );
        let items = list_items("p1", lines, Utc::now());
        assert_eq!(items[0].ingredient_id, "butter");
        assert_eq!(items[0].sequence, 0);
        assert_eq!(items[1].ingredient_id, "salt");
        assert_eq!(items[1].status, GroceryListItemStatus::Unknown);
        assert_eq!(items[0].id, id_from_key(&["grocery", "p1", "butter", "g"]));
    }

    proptest! {
        #[test]
        fn canonical_total_matches_converted_sum(
            raw in proptest::collection::vec((0usize..3, 0.01f64..1000.0), 1..20),
        ) {
            let c = catalog();
            let unit_ids = ["g", "kg", "lb"];
            let demands: Vec<Demand> = raw
                .iter()
                .map(|(u, q)| demand("butter", unit_ids[*u], *q, None))
                .collect();
            let lines = aggregate(&c, &demands);
            prop_assert_eq!(lines.len(), 1);
            let line = &lines[0];

            let expected: f64 = demands
                .iter()
                .map(|d| d.min_qty * c.convert(&d.unit_id, &line.unit_id, Some("butter")).unwrap())
                .sum();
            prop_assert!((line.min_qty - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        }
    }
}
