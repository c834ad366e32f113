//! Recipe graphs and supporting-recipe closures.
//!
//! A [`RecipeClosure`] is a recipe together with every recipe reachable
//! through `supporting_recipes`. Loading validates each recipe's step graph
//! and checks that the supporting relation is acyclic.

mod graph;

use std::collections::{BTreeMap, HashMap, VecDeque};

use sqlx::PgConnection;
use thiserror::Error;

use prixfixe_db::queries::recipes::{self as db, RecipeGraphRows};

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};

pub use graph::RecipeGraph;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipeGraphError {
    #[error("recipe {recipe}: step indices must be contiguous from 0, found {found:?}")]
    NonContiguousSteps { recipe: String, found: Vec<i32> },

    #[error("recipe {recipe}: step {step} consumes a product of step {producer}, which does not precede it")]
    ForwardProductReference {
        recipe: String,
        step: i32,
        producer: i32,
    },

    #[error("recipe {recipe}: step {step} consumes product {product} of step {producer}, which step {producer} does not make")]
    MissingProduct {
        recipe: String,
        step: i32,
        producer: i32,
        product: i32,
    },

    #[error("recipe {recipe}: unknown {what} {id}")]
    DanglingReference {
        recipe: String,
        what: &'static str,
        id: String,
    },

    #[error("recipe {recipe}: prep task {task} references step {step} from another recipe")]
    ForeignPrepTaskStep {
        recipe: String,
        task: String,
        step: String,
    },

    #[error("recipe {recipe}: supporting recipe {missing} does not exist")]
    MissingSupportingRecipe { recipe: String, missing: String },

    #[error("supporting recipe cycle involving: {0}")]
    SupportingCycle(String),
}

/// A recipe and its supporting recipes, each validated.
#[derive(Debug, Clone)]
pub struct RecipeClosure {
    /// Root first, then supporting recipes in dependency order (a recipe
    /// before the recipes that support it), ties broken by id.
    graphs: Vec<RecipeGraph>,
}

impl RecipeClosure {
    pub fn build(rows: RecipeGraphRows, catalog: Option<&Catalog>) -> Result<Self, RecipeGraphError> {
        let root_id = rows.root().recipe.id.clone();
        let mut by_id: BTreeMap<String, RecipeGraph> = BTreeMap::new();
        for r in rows.recipes {
            let g = RecipeGraph::build(r, catalog)?;
            by_id.insert(g.id().to_owned(), g);
        }

        for g in by_id.values() {
            for s in g.supporting_recipe_ids() {
                if !by_id.contains_key(s) {
                    return Err(RecipeGraphError::MissingSupportingRecipe {
                        recipe: g.id().to_owned(),
                        missing: s.clone(),
                    });
                }
            }
        }

        let order = supporting_order(&by_id)?;
        let mut graphs: Vec<RecipeGraph> = Vec::with_capacity(order.len());
        for id in order {
            if let Some(g) = by_id.remove(&id) {
                graphs.push(g);
            }
        }
        // The root has no incoming edges inside its own closure, so Kahn's
        // order starts with it unless it sits on a cycle, which was rejected.
        debug_assert_eq!(graphs.first().map(RecipeGraph::id), Some(root_id.as_str()));
        Ok(Self { graphs })
    }

    pub fn root(&self) -> &RecipeGraph {
        &self.graphs[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecipeGraph> {
        self.graphs.iter()
    }
}

/// Kahn's algorithm over `recipe -> supporting recipe` edges.
fn supporting_order(by_id: &BTreeMap<String, RecipeGraph>) -> Result<Vec<String>, RecipeGraphError> {
    let mut in_degree: HashMap<&str, usize> = by_id.keys().map(|k| (k.as_str(), 0)).collect();
    for g in by_id.values() {
        for s in g.supporting_recipe_ids() {
            if let Some(d) = in_degree.get_mut(s.as_str()) {
                *d += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = by_id
        .keys()
        .map(String::as_str)
        .filter(|k| in_degree[k] == 0)
        .collect();

    let mut order = Vec::with_capacity(by_id.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_owned());
        let mut next: Vec<&str> = by_id[id]
            .supporting_recipe_ids()
            .iter()
            .map(String::as_str)
            .collect();
        next.sort_unstable();
        next.dedup();
        for s in next {
            if let Some(d) = in_degree.get_mut(s) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(s);
                }
            }
        }
    }

    if order.len() != by_id.len() {
        let cyclic: Vec<&str> = by_id
            .keys()
            .map(String::as_str)
            .filter(|k| in_degree[k] > 0)
            .collect();
        return Err(RecipeGraphError::SupportingCycle(cyclic.join(", ")));
    }
    Ok(order)
}

/// Load and validate a recipe closure.
///
/// Returns `not_found` when the root recipe is missing and
/// `invalid_recipe_graph` when any recipe in the closure fails validation.
pub async fn load_recipe_closure(
    conn: &mut PgConnection,
    recipe_id: &str,
    catalog: &Catalog,
) -> EngineResult<RecipeClosure> {
    let rows = db::get_recipe_with_graph(conn, recipe_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("recipe {recipe_id}")))?;
    Ok(RecipeClosure::build(rows, Some(catalog))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prixfixe_db::queries::recipes::RecipeRows;
    use prixfixe_test_utils::fixtures::{RecipeBuilder, conversion, ingredient, unit};

    fn catalog() -> Catalog {
        Catalog::builder()
            .unit(unit("g", "gram", true))
            .unit(unit("lb", "pound", false))
            .ingredient(ingredient("onion", "onion"))
            .ingredient(ingredient("butter", "butter"))
            .preparation(prixfixe_test_utils::fixtures::PREP_ID)
            .conversion(conversion("c", "lb", "g", 453.592, None))
            .build()
            .unwrap()
    }

    fn onion_recipe() -> RecipeRows {
        RecipeBuilder::new("r")
            .step(0)
            .ingredient(0, "onion", "g", 100.0, None)
            .product(0, 0, "chopped onion")
            .step(1)
            .uses_product(1, 0, 0, "g")
            .ingredient(1, "butter", "g", 20.0, None)
            .product(1, 0, "soffritto")
            .step(2)
            .uses_product(2, 1, 0, "g")
            .uses_product(2, 0, 0, "g")
            .prep_task("p0", "chop onion", 3600, None)
            .task_step("p0", 0, true)
            .build()
    }

    fn closure(recipes: Vec<RecipeRows>) -> Result<RecipeClosure, RecipeGraphError> {
        RecipeClosure::build(RecipeGraphRows { recipes }, Some(&catalog()))
    }

    #[test]
    fn step_lookups_are_consistent() {
        let g = RecipeGraph::build(onion_recipe(), Some(&catalog())).unwrap();
        assert_eq!(g.steps().len(), 3);
        let s1 = g.step_by_index(1).unwrap();
        assert_eq!(g.step_by_id(&s1.id).unwrap().step_index, 1);
        assert!(g.step_by_index(3).is_none());
        assert!(g.step_by_index(-1).is_none());
        assert!(g.step_by_id("nope").is_none());
    }

    #[test]
    fn producers_are_backlinks() {
        let g = RecipeGraph::build(onion_recipe(), None).unwrap();
        assert!(g.producers_of(0).is_empty());
        assert_eq!(g.producers_of(1), &[(0, 0)]);
        assert_eq!(g.producers_of(2), &[(0, 0), (1, 0)]);
        assert!(g.producers_of(9).is_empty());
    }

    #[test]
    fn satisfies_only_flagged_steps() {
        let g = RecipeGraph::build(onion_recipe(), None).unwrap();
        let task = &g.prep_tasks()[0];
        assert!(g.prep_task_satisfies(task, g.step_by_index(0).unwrap()));
        assert!(!g.prep_task_satisfies(task, g.step_by_index(1).unwrap()));
        assert_eq!(g.task_step_indices("p0"), vec![0]);
    }

    #[test]
    fn rejects_self_reference() {
        let rows = RecipeBuilder::new("r")
            .step(0)
            .product(0, 0, "x")
            .uses_product(0, 0, 0, "g")
            .build();
        let err = RecipeGraph::build(rows, None).unwrap_err();
        assert!(matches!(err, RecipeGraphError::ForwardProductReference { step: 0, producer: 0, .. }));
    }

    #[test]
    fn rejects_forward_reference() {
        let rows = RecipeBuilder::new("r")
            .step(0)
            .uses_product(0, 1, 0, "g")
            .step(1)
            .product(1, 0, "x")
            .build();
        let err = RecipeGraph::build(rows, None).unwrap_err();
        assert!(matches!(err, RecipeGraphError::ForwardProductReference { .. }));
    }

    #[test]
    fn rejects_missing_product() {
        let rows = RecipeBuilder::new("r")
            .step(0)
            .step(1)
            .uses_product(1, 0, 3, "g")
            .build();
        let err = RecipeGraph::build(rows, None).unwrap_err();
        assert!(matches!(err, RecipeGraphError::MissingProduct { product: 3, .. }));
    }

    #[test]
    fn rejects_gaps_in_step_indices() {
        let rows = RecipeBuilder::new("r").step(0).step(2).build();
        let err = RecipeGraph::build(rows, None).unwrap_err();
        assert_eq!(
            err,
            RecipeGraphError::NonContiguousSteps {
                recipe: "r".into(),
                found: vec![0, 2]
            }
        );
    }

    #[test]
    fn rejects_unknown_catalog_ingredient() {
        let rows = RecipeBuilder::new("r")
            .step(0)
            .ingredient(0, "saffron", "g", 1.0, None)
            .build();
        let err = RecipeGraph::build(rows, Some(&catalog())).unwrap_err();
        assert!(matches!(
            err,
            RecipeGraphError::DanglingReference { what: "ingredient", .. }
        ));
    }

    #[test]
    fn closure_orders_root_first() {
        let stock = RecipeBuilder::new("stock").step(0).build();
        let base = RecipeBuilder::new("base").supporting("stock").step(0).build();
        let soup = RecipeBuilder::new("soup")
            .supporting("base")
            .supporting("stock")
            .step(0)
            .build();
        let c = closure(vec![soup, base, stock]).unwrap();
        let ids: Vec<&str> = c.iter().map(RecipeGraph::id).collect();
        assert_eq!(ids, vec!["soup", "base", "stock"]);
        assert_eq!(c.root().id(), "soup");
    }

    #[test]
    fn closure_rejects_supporting_cycle() {
        let a = RecipeBuilder::new("a").supporting("b").step(0).build();
        let b = RecipeBuilder::new("b").supporting("c").step(0).build();
        let c = RecipeBuilder::new("c").supporting("b").step(0).build();
        let err = closure(vec![a, b, c]).unwrap_err();
        assert_eq!(err, RecipeGraphError::SupportingCycle("b, c".into()));
    }

    #[test]
    fn closure_rejects_missing_supporting_recipe() {
        let a = RecipeBuilder::new("a").supporting("ghost").step(0).build();
        let err = closure(vec![a]).unwrap_err();
        assert!(matches!(err, RecipeGraphError::MissingSupportingRecipe { .. }));
    }

    #[test]
    fn graph_error_converts_to_engine_kind() {
        let e: EngineError = RecipeGraphError::SupportingCycle("x".into()).into();
        assert_eq!(e.kind(), "invalid_recipe_graph");
    }
}
