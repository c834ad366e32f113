//! Database query functions for recipes and their step graphs.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::models::{
    Recipe, RecipePrepTask, RecipePrepTaskStep, RecipeStep, RecipeStepCompletionCondition,
    RecipeStepIngredient, RecipeStepInstrument, RecipeStepProduct, RecipeStepVessel,
};

/// A recipe and every row hanging off it.
#[derive(Debug, Clone, Default)]
pub struct RecipeRows {
    pub recipe: Recipe,
    pub supporting_recipe_ids: Vec<String>,
    pub steps: Vec<RecipeStep>,
    pub ingredients: Vec<RecipeStepIngredient>,
    pub instruments: Vec<RecipeStepInstrument>,
    pub vessels: Vec<RecipeStepVessel>,
    pub products: Vec<RecipeStepProduct>,
    pub completion_conditions: Vec<RecipeStepCompletionCondition>,
    pub prep_tasks: Vec<RecipePrepTask>,
    pub prep_task_steps: Vec<RecipePrepTaskStep>,
}

/// A recipe plus the transitive closure of its supporting recipes.
///
/// `recipes[0]` is the requested recipe; the rest are ordered by id.
#[derive(Debug, Clone)]
pub struct RecipeGraphRows {
    pub recipes: Vec<RecipeRows>,
}

impl RecipeGraphRows {
    pub fn root(&self) -> &RecipeRows {
        &self.recipes[0]
    }

    pub fn get(&self, recipe_id: &str) -> Option<&RecipeRows> {
        self.recipes.iter().find(|r| r.recipe.id == recipe_id)
    }
}

/// Insert a recipe and all of its rows in one transaction.
pub async fn insert_recipe(pool: &PgPool, rows: &RecipeRows) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin recipe insert")?;
    insert_recipe_rows(&mut *tx, rows).await?;
    tx.commit()
        .await
        .context("failed to commit recipe insert")?;
    Ok(())
}

/// Insert a recipe's rows on an existing connection.
pub async fn insert_recipe_rows(conn: &mut PgConnection, rows: &RecipeRows) -> Result<()> {
    let r = &rows.recipe;
    sqlx::query(
        "INSERT INTO recipes (id, name, yields_portions_min, yields_portions_max, yields_component_type) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&r.id)
    .bind(&r.name)
    .bind(r.yields_portions_min)
    .bind(r.yields_portions_max)
    .bind(r.yields_component_type)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to insert recipe {}", r.id))?;

    for supporting in &rows.supporting_recipe_ids {
        sqlx::query(
            "INSERT INTO recipe_supporting_recipes (recipe_id, supporting_recipe_id) VALUES ($1, $2)",
        )
        .bind(&r.id)
        .bind(supporting)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to link supporting recipe {supporting}"))?;
    }

    for s in &rows.steps {
        sqlx::query(
            "INSERT INTO recipe_steps \
             (id, recipe_id, step_index, preparation_id, min_est_time_s, max_est_time_s, \
              temperature_c, notes, start_timer_automatically, optional) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&s.id)
        .bind(&s.recipe_id)
        .bind(s.step_index)
        .bind(&s.preparation_id)
        .bind(s.min_est_time_s)
        .bind(s.max_est_time_s)
        .bind(s.temperature_c)
        .bind(&s.notes)
        .bind(s.start_timer_automatically)
        .bind(s.optional)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert recipe step {}", s.id))?;
    }

    for i in &rows.ingredients {
        sqlx::query(
            "INSERT INTO recipe_step_ingredients \
             (id, step_id, name, ingredient_id, product_of_step_index, product_index, \
              measurement_unit_id, quantity_min, quantity_max, optional, to_taste, \
              product_percentage_to_use) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&i.id)
        .bind(&i.step_id)
        .bind(&i.name)
        .bind(&i.ingredient_id)
        .bind(i.product_of_step_index)
        .bind(i.product_index)
        .bind(&i.measurement_unit_id)
        .bind(i.quantity_min)
        .bind(i.quantity_max)
        .bind(i.optional)
        .bind(i.to_taste)
        .bind(i.product_percentage_to_use)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert step ingredient {}", i.id))?;
    }

    for i in &rows.instruments {
        sqlx::query(
            "INSERT INTO recipe_step_instruments \
             (id, step_id, name, instrument_id, product_of_step_index, product_index, \
              quantity_min, quantity_max, optional) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&i.id)
        .bind(&i.step_id)
        .bind(&i.name)
        .bind(&i.instrument_id)
        .bind(i.product_of_step_index)
        .bind(i.product_index)
        .bind(i.quantity_min)
        .bind(i.quantity_max)
        .bind(i.optional)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert step instrument {}", i.id))?;
    }

    for v in &rows.vessels {
        sqlx::query(
            "INSERT INTO recipe_step_vessels \
             (id, step_id, name, vessel_id, product_of_step_index, product_index, \
              quantity_min, quantity_max) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&v.id)
        .bind(&v.step_id)
        .bind(&v.name)
        .bind(&v.vessel_id)
        .bind(v.product_of_step_index)
        .bind(v.product_index)
        .bind(v.quantity_min)
        .bind(v.quantity_max)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert step vessel {}", v.id))?;
    }

    for p in &rows.products {
        sqlx::query(
            "INSERT INTO recipe_step_products \
             (id, step_id, product_index, name, kind, measurement_unit_id, quantity_min, \
              quantity_max, storage_temperature_c, storage_duration_s, is_waste, is_liquid, \
              contained_in_vessel_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&p.id)
        .bind(&p.step_id)
        .bind(p.product_index)
        .bind(&p.name)
        .bind(p.kind)
        .bind(&p.measurement_unit_id)
        .bind(p.quantity_min)
        .bind(p.quantity_max)
        .bind(p.storage_temperature_c)
        .bind(p.storage_duration_s)
        .bind(p.is_waste)
        .bind(p.is_liquid)
        .bind(p.contained_in_vessel_index)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert step product {}", p.id))?;
    }

    for c in &rows.completion_conditions {
        sqlx::query(
            "INSERT INTO recipe_step_completion_conditions \
             (id, step_id, ingredient_state_id, ingredient_indices, optional, notes) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&c.id)
        .bind(&c.step_id)
        .bind(&c.ingredient_state_id)
        .bind(&c.ingredient_indices)
        .bind(c.optional)
        .bind(&c.notes)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert completion condition {}", c.id))?;
    }

    for t in &rows.prep_tasks {
        sqlx::query(
            "INSERT INTO recipe_prep_tasks \
             (id, recipe_id, name, notes, storage_type, storage_temperature_c, \
              buffer_min_s, buffer_max_s) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&t.id)
        .bind(&t.recipe_id)
        .bind(&t.name)
        .bind(&t.notes)
        .bind(t.storage_type)
        .bind(t.storage_temperature_c)
        .bind(t.buffer_min_s)
        .bind(t.buffer_max_s)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert prep task {}", t.id))?;
    }

    for ts in &rows.prep_task_steps {
        sqlx::query(
            "INSERT INTO recipe_prep_task_steps (id, prep_task_id, step_id, satisfies_recipe_step) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&ts.id)
        .bind(&ts.prep_task_id)
        .bind(&ts.step_id)
        .bind(ts.satisfies_recipe_step)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert prep task step {}", ts.id))?;
    }

    Ok(())
}

/// Fetch a bare recipe row.
pub async fn get_recipe<'e>(executor: impl PgExecutor<'e>, id: &str) -> Result<Option<Recipe>> {
    let recipe = sqlx::query_as::<_, Recipe>("SELECT * FROM recipes WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch recipe")?;

    Ok(recipe)
}

/// Ids of `id` and every recipe reachable through `recipe_supporting_recipes`.
///
/// `UNION` (not `UNION ALL`) makes the recursion terminate on cyclic data;
/// cycle rejection is left to graph validation.
pub async fn supporting_closure_ids<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "WITH RECURSIVE closure(id) AS ( \
             SELECT $1::text \
             UNION \
             SELECT rsr.supporting_recipe_id \
             FROM recipe_supporting_recipes rsr \
             JOIN closure c ON rsr.recipe_id = c.id \
         ) \
         SELECT id FROM closure ORDER BY id",
    )
    .bind(id)
    .fetch_all(executor)
    .await
    .context("failed to resolve supporting recipe closure")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Load a recipe with all supporting recipes and their full step graphs.
///
/// Returns `None` when the root recipe does not exist. Supporting recipe ids
/// that point at missing rows are left in `supporting_recipe_ids` so that
/// graph validation can report them.
pub async fn get_recipe_with_graph(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<RecipeGraphRows>> {
    if get_recipe(&mut *conn, id).await?.is_none() {
        return Ok(None);
    }

    let ids = supporting_closure_ids(&mut *conn, id).await?;

    let recipes = sqlx::query_as::<_, Recipe>("SELECT * FROM recipes WHERE id = ANY($1) ORDER BY id")
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .context("failed to load recipes")?;

    let edges: Vec<(String, String)> = sqlx::query_as(
        "SELECT recipe_id, supporting_recipe_id FROM recipe_supporting_recipes \
         WHERE recipe_id = ANY($1) ORDER BY recipe_id, supporting_recipe_id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load supporting recipe links")?;

    let steps = sqlx::query_as::<_, RecipeStep>(
        "SELECT * FROM recipe_steps WHERE recipe_id = ANY($1) ORDER BY recipe_id, step_index",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load recipe steps")?;

    let ingredients = sqlx::query_as::<_, RecipeStepIngredient>(
        "SELECT x.* FROM recipe_step_ingredients x \
         JOIN recipe_steps s ON s.id = x.step_id \
         WHERE s.recipe_id = ANY($1) ORDER BY x.step_id, x.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load step ingredients")?;

    let instruments = sqlx::query_as::<_, RecipeStepInstrument>(
        "SELECT x.* FROM recipe_step_instruments x \
         JOIN recipe_steps s ON s.id = x.step_id \
         WHERE s.recipe_id = ANY($1) ORDER BY x.step_id, x.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load step instruments")?;

    let vessels = sqlx::query_as::<_, RecipeStepVessel>(
        "SELECT x.* FROM recipe_step_vessels x \
         JOIN recipe_steps s ON s.id = x.step_id \
         WHERE s.recipe_id = ANY($1) ORDER BY x.step_id, x.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load step vessels")?;

    let products = sqlx::query_as::<_, RecipeStepProduct>(
        "SELECT x.* FROM recipe_step_products x \
         JOIN recipe_steps s ON s.id = x.step_id \
         WHERE s.recipe_id = ANY($1) ORDER BY x.step_id, x.product_index",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load step products")?;

    let completion_conditions = sqlx::query_as::<_, RecipeStepCompletionCondition>(
        "SELECT x.* FROM recipe_step_completion_conditions x \
         JOIN recipe_steps s ON s.id = x.step_id \
         WHERE s.recipe_id = ANY($1) ORDER BY x.step_id, x.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load completion conditions")?;

    let prep_tasks = sqlx::query_as::<_, RecipePrepTask>(
        "SELECT * FROM recipe_prep_tasks WHERE recipe_id = ANY($1) ORDER BY recipe_id, id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load prep tasks")?;

    let prep_task_steps = sqlx::query_as::<_, RecipePrepTaskStep>(
        "SELECT x.* FROM recipe_prep_task_steps x \
         JOIN recipe_prep_tasks t ON t.id = x.prep_task_id \
         WHERE t.recipe_id = ANY($1) ORDER BY x.prep_task_id, x.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .context("failed to load prep task steps")?;

    let mut by_recipe: HashMap<String, RecipeRows> = recipes
        .into_iter()
        .map(|recipe| {
            (
                recipe.id.clone(),
                RecipeRows {
                    recipe,
                    ..RecipeRows::default()
                },
            )
        })
        .collect();

    for (recipe_id, supporting) in edges {
        if let Some(rows) = by_recipe.get_mut(&recipe_id) {
            rows.supporting_recipe_ids.push(supporting);
        }
    }

    let step_owner: HashMap<String, String> = steps
        .iter()
        .map(|s| (s.id.clone(), s.recipe_id.clone()))
        .collect();
    let task_owner: HashMap<String, String> = prep_tasks
        .iter()
        .map(|t| (t.id.clone(), t.recipe_id.clone()))
        .collect();

    for s in steps {
        if let Some(rows) = by_recipe.get_mut(&s.recipe_id) {
            rows.steps.push(s);
        }
    }
    for x in ingredients {
        if let Some(rows) = step_owner.get(&x.step_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.ingredients.push(x);
        }
    }
    for x in instruments {
        if let Some(rows) = step_owner.get(&x.step_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.instruments.push(x);
        }
    }
    for x in vessels {
        if let Some(rows) = step_owner.get(&x.step_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.vessels.push(x);
        }
    }
    for x in products {
        if let Some(rows) = step_owner.get(&x.step_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.products.push(x);
        }
    }
    for x in completion_conditions {
        if let Some(rows) = step_owner.get(&x.step_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.completion_conditions.push(x);
        }
    }
    for t in prep_tasks {
        if let Some(rows) = by_recipe.get_mut(&t.recipe_id) {
            rows.prep_tasks.push(t);
        }
    }
    for x in prep_task_steps {
        if let Some(rows) = task_owner.get(&x.prep_task_id).and_then(|r| by_recipe.get_mut(r)) {
            rows.prep_task_steps.push(x);
        }
    }

    let Some(root) = by_recipe.remove(id) else {
        return Ok(None);
    };
    let mut rest: Vec<RecipeRows> = by_recipe.into_values().collect();
    rest.sort_by(|a, b| a.recipe.id.cmp(&b.recipe.id));

    let mut recipes = Vec::with_capacity(rest.len() + 1);
    recipes.push(root);
    recipes.extend(rest);

    Ok(Some(RecipeGraphRows { recipes }))
}
