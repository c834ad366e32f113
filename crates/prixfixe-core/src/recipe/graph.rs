//! In-memory projection of one recipe's step graph.

use std::collections::HashMap;

use prixfixe_db::models::{
    Recipe, RecipePrepTask, RecipePrepTaskStep, RecipeStep, RecipeStepIngredient,
};
use prixfixe_db::queries::recipes::RecipeRows;

use super::RecipeGraphError;
use crate::catalog::Catalog;

/// A validated recipe with O(1) step lookups.
///
/// Steps are stored in index order, which is also a topological order of the
/// producer relation: a step may only consume products of earlier steps.
#[derive(Debug, Clone)]
pub struct RecipeGraph {
    rows: RecipeRows,
    by_id: HashMap<String, usize>,
    ingredients_by_step: Vec<Vec<usize>>,
    products_by_step: Vec<Vec<usize>>,
    task_steps_by_task: HashMap<String, Vec<usize>>,
    producers: Vec<Vec<(i32, i32)>>,
}

impl RecipeGraph {
    /// Index and validate a recipe's rows.
    ///
    /// When `catalog` is given, catalog references (ingredients, units,
    /// preparations, instruments, vessels, ingredient states) must resolve.
    pub fn build(mut rows: RecipeRows, catalog: Option<&Catalog>) -> Result<Self, RecipeGraphError> {
        let recipe_id = rows.recipe.id.clone();
        rows.steps.sort_by_key(|s| s.step_index);

        let found: Vec<i32> = rows.steps.iter().map(|s| s.step_index).collect();
        if found.iter().enumerate().any(|(pos, idx)| *idx as usize != pos) {
            return Err(RecipeGraphError::NonContiguousSteps {
                recipe: recipe_id,
                found,
            });
        }

        let by_id: HashMap<String, usize> = rows
            .steps
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.id.clone(), pos))
            .collect();

        let n = rows.steps.len();
        let mut ingredients_by_step = vec![Vec::new(); n];
        let mut products_by_step = vec![Vec::new(); n];

        for (i, ing) in rows.ingredients.iter().enumerate() {
            let pos = step_pos(&by_id, &recipe_id, &ing.step_id)?;
            ingredients_by_step[pos].push(i);
        }
        for (i, p) in rows.products.iter().enumerate() {
            let pos = step_pos(&by_id, &recipe_id, &p.step_id)?;
            products_by_step[pos].push(i);
        }

        let mut task_steps_by_task: HashMap<String, Vec<usize>> = HashMap::new();
        for t in &rows.prep_tasks {
            task_steps_by_task.entry(t.id.clone()).or_default();
        }
        for (i, ts) in rows.prep_task_steps.iter().enumerate() {
            if !by_id.contains_key(&ts.step_id) {
                return Err(RecipeGraphError::ForeignPrepTaskStep {
                    recipe: recipe_id,
                    task: ts.prep_task_id.clone(),
                    step: ts.step_id.clone(),
                });
            }
            match task_steps_by_task.get_mut(&ts.prep_task_id) {
                Some(list) => list.push(i),
                None => {
                    return Err(RecipeGraphError::DanglingReference {
                        recipe: recipe_id,
                        what: "prep task",
                        id: ts.prep_task_id.clone(),
                    });
                }
            }
        }

        let mut graph = Self {
            rows,
            by_id,
            ingredients_by_step,
            products_by_step,
            task_steps_by_task,
            producers: vec![Vec::new(); n],
        };
        graph.link_products()?;
        if let Some(catalog) = catalog {
            graph.check_catalog(catalog)?;
        }
        graph.check_completion_conditions()?;
        Ok(graph)
    }

    /// Resolve product references and reject any that point at the same or
    /// a later step, or at a product the producer does not make.
    fn link_products(&mut self) -> Result<(), RecipeGraphError> {
        let recipe = self.rows.recipe.id.clone();

        let mut refs: Vec<(usize, i32, i32)> = Vec::new();
        for ing in &self.rows.ingredients {
            if let Some(of) = ing.product_of_step_index {
                refs.push((self.by_id[&ing.step_id], of, ing.product_index.unwrap_or(0)));
            }
        }
        for ins in &self.rows.instruments {
            if let Some(of) = ins.product_of_step_index {
                let pos = step_pos(&self.by_id, &recipe, &ins.step_id)?;
                self.check_product_ref(pos, of, ins.product_index.unwrap_or(0))?;
            }
        }
        for v in &self.rows.vessels {
            if let Some(of) = v.product_of_step_index {
                let pos = step_pos(&self.by_id, &recipe, &v.step_id)?;
                self.check_product_ref(pos, of, v.product_index.unwrap_or(0))?;
            }
        }

        for (pos, of, product) in refs {
            self.check_product_ref(pos, of, product)?;
            self.producers[pos].push((of, product));
        }
        for list in &mut self.producers {
            list.sort_unstable();
            list.dedup();
        }
        Ok(())
    }

    fn check_product_ref(&self, pos: usize, of: i32, product: i32) -> Result<(), RecipeGraphError> {
        let step = self.rows.steps[pos].step_index;
        if of < 0 || of >= step {
            return Err(RecipeGraphError::ForwardProductReference {
                recipe: self.rows.recipe.id.clone(),
                step,
                producer: of,
            });
        }
        let exists = self.products_by_step[of as usize]
            .iter()
            .any(|&i| self.rows.products[i].product_index == product);
        if !exists {
            return Err(RecipeGraphError::MissingProduct {
                recipe: self.rows.recipe.id.clone(),
                step,
                producer: of,
                product,
            });
        }
        Ok(())
    }

    fn check_catalog(&self, catalog: &Catalog) -> Result<(), RecipeGraphError> {
        let dangling = |what: &'static str, id: &str| RecipeGraphError::DanglingReference {
            recipe: self.rows.recipe.id.clone(),
            what,
            id: id.to_owned(),
        };

        for s in &self.rows.steps {
            if !catalog.has_preparation(&s.preparation_id) {
                return Err(dangling("preparation", &s.preparation_id));
            }
        }
        for i in &self.rows.ingredients {
            if let Some(id) = &i.ingredient_id {
                if catalog.ingredient(id).is_none() {
                    return Err(dangling("ingredient", id));
                }
            }
            if catalog.unit(&i.measurement_unit_id).is_none() {
                return Err(dangling("measurement unit", &i.measurement_unit_id));
            }
        }
        for i in &self.rows.instruments {
            if let Some(id) = &i.instrument_id {
                if !catalog.has_instrument(id) {
                    return Err(dangling("instrument", id));
                }
            }
        }
        for v in &self.rows.vessels {
            if let Some(id) = &v.vessel_id {
                if !catalog.has_vessel(id) {
                    return Err(dangling("vessel", id));
                }
            }
        }
        for p in &self.rows.products {
            if let Some(id) = &p.measurement_unit_id {
                if catalog.unit(id).is_none() {
                    return Err(dangling("measurement unit", id));
                }
            }
        }
        for c in &self.rows.completion_conditions {
            if !catalog.has_ingredient_state(&c.ingredient_state_id) {
                return Err(dangling("ingredient state", &c.ingredient_state_id));
            }
        }
        Ok(())
    }

    fn check_completion_conditions(&self) -> Result<(), RecipeGraphError> {
        for c in &self.rows.completion_conditions {
            let pos = step_pos(&self.by_id, &self.rows.recipe.id, &c.step_id)?;
            let count = self.ingredients_by_step[pos].len() as i32;
            if let Some(bad) = c.ingredient_indices.iter().find(|&&i| i < 0 || i >= count) {
                return Err(RecipeGraphError::DanglingReference {
                    recipe: self.rows.recipe.id.clone(),
                    what: "step ingredient index",
                    id: bad.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn recipe(&self) -> &Recipe {
        &self.rows.recipe
    }

    pub fn id(&self) -> &str {
        &self.rows.recipe.id
    }

    /// Steps in index order.
    pub fn steps(&self) -> &[RecipeStep] {
        &self.rows.steps
    }

    pub fn step_by_id(&self, id: &str) -> Option<&RecipeStep> {
        self.by_id.get(id).map(|&pos| &self.rows.steps[pos])
    }

    pub fn step_by_index(&self, index: i32) -> Option<&RecipeStep> {
        usize::try_from(index).ok().and_then(|i| self.rows.steps.get(i))
    }

    pub fn ingredients_of(&self, step_index: i32) -> impl Iterator<Item = &RecipeStepIngredient> {
        let list = usize::try_from(step_index)
            .ok()
            .and_then(|i| self.ingredients_by_step.get(i))
            .map(Vec::as_slice)
            .unwrap_or_default();
        list.iter().map(|&i| &self.rows.ingredients[i])
    }

    /// `(producer_step_index, product_index)` for every ingredient of the
    /// step that consumes an earlier step's product.
    pub fn producers_of(&self, step_index: i32) -> &[(i32, i32)] {
        usize::try_from(step_index)
            .ok()
            .and_then(|i| self.producers.get(i))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn prep_tasks(&self) -> &[RecipePrepTask] {
        &self.rows.prep_tasks
    }

    pub fn task_steps(&self, task_id: &str) -> impl Iterator<Item = &RecipePrepTaskStep> {
        self.task_steps_by_task
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.rows.prep_task_steps[i])
    }

    /// Step indices a prep task touches, ascending.
    pub fn task_step_indices(&self, task_id: &str) -> Vec<i32> {
        let mut out: Vec<i32> = self
            .task_steps(task_id)
            .filter_map(|ts| self.step_by_id(&ts.step_id))
            .map(|s| s.step_index)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether completing `task` counts as completing `step`.
    pub fn prep_task_satisfies(&self, task: &RecipePrepTask, step: &RecipeStep) -> bool {
        self.task_steps(&task.id)
            .any(|ts| ts.step_id == step.id && ts.satisfies_recipe_step)
    }

    pub fn supporting_recipe_ids(&self) -> &[String] {
        &self.rows.supporting_recipe_ids
    }
}

fn step_pos(
    by_id: &HashMap<String, usize>,
    recipe: &str,
    step_id: &str,
) -> Result<usize, RecipeGraphError> {
    by_id
        .get(step_id)
        .copied()
        .ok_or_else(|| RecipeGraphError::DanglingReference {
            recipe: recipe.to_owned(),
            what: "step",
            id: step_id.to_owned(),
        })
}
