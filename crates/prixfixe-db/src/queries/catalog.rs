//! Database query functions for the reference catalog tables.
//!
//! The engine reads the catalog as a whole through [`load_catalog_rows`];
//! the insert helpers exist for seeding and tests.

use anyhow::{Context, Result};
use sqlx::{PgExecutor, PgPool};

use crate::models::{
    ValidIngredient, ValidIngredientState, ValidInstrument, ValidMeasurementUnit,
    ValidMeasurementUnitConversion, ValidPreparation, ValidVessel,
};

/// Every catalog table, read in one pass.
#[derive(Debug, Clone, Default)]
pub struct CatalogRows {
    pub units: Vec<ValidMeasurementUnit>,
    pub ingredients: Vec<ValidIngredient>,
    pub preparations: Vec<ValidPreparation>,
    pub instruments: Vec<ValidInstrument>,
    pub vessels: Vec<ValidVessel>,
    pub ingredient_states: Vec<ValidIngredientState>,
    pub conversions: Vec<ValidMeasurementUnitConversion>,
}

/// Read all catalog tables inside one repeatable-read transaction so the
/// snapshot is consistent.
pub async fn load_catalog_rows(pool: &PgPool) -> Result<CatalogRows> {
    let mut tx = pool.begin().await.context("failed to begin catalog read")?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await
        .context("failed to set catalog read isolation")?;

    let units = sqlx::query_as::<_, ValidMeasurementUnit>(
        "SELECT * FROM valid_measurement_units ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("failed to load measurement units")?;

    let ingredients =
        sqlx::query_as::<_, ValidIngredient>("SELECT * FROM valid_ingredients ORDER BY id")
            .fetch_all(&mut *tx)
            .await
            .context("failed to load ingredients")?;

    let preparations =
        sqlx::query_as::<_, ValidPreparation>("SELECT * FROM valid_preparations ORDER BY id")
            .fetch_all(&mut *tx)
            .await
            .context("failed to load preparations")?;

    let instruments =
        sqlx::query_as::<_, ValidInstrument>("SELECT * FROM valid_instruments ORDER BY id")
            .fetch_all(&mut *tx)
            .await
            .context("failed to load instruments")?;

    let vessels = sqlx::query_as::<_, ValidVessel>("SELECT * FROM valid_vessels ORDER BY id")
        .fetch_all(&mut *tx)
        .await
        .context("failed to load vessels")?;

    let ingredient_states = sqlx::query_as::<_, ValidIngredientState>(
        "SELECT * FROM valid_ingredient_states ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("failed to load ingredient states")?;

    let conversions = sqlx::query_as::<_, ValidMeasurementUnitConversion>(
        "SELECT * FROM valid_measurement_unit_conversions ORDER BY id",
    )
    .fetch_all(&mut *tx)
    .await
    .context("failed to load unit conversions")?;

    tx.commit().await.context("failed to finish catalog read")?;

    Ok(CatalogRows {
        units,
        ingredients,
        preparations,
        instruments,
        vessels,
        ingredient_states,
        conversions,
    })
}

pub async fn insert_unit<'e>(
    executor: impl PgExecutor<'e>,
    unit: &ValidMeasurementUnit,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO valid_measurement_units (id, name, universal, metric, imperial) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&unit.id)
    .bind(&unit.name)
    .bind(unit.universal)
    .bind(unit.metric)
    .bind(unit.imperial)
    .execute(executor)
    .await
    .with_context(|| format!("failed to insert measurement unit {}", unit.id))?;

    Ok(())
}

pub async fn insert_ingredient<'e>(
    executor: impl PgExecutor<'e>,
    ingredient: &ValidIngredient,
) -> Result<()> {
    sqlx::query("INSERT INTO valid_ingredients (id, name, is_liquid) VALUES ($1, $2, $3)")
        .bind(&ingredient.id)
        .bind(&ingredient.name)
        .bind(ingredient.is_liquid)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert ingredient {}", ingredient.id))?;

    Ok(())
}

pub async fn insert_preparation<'e>(
    executor: impl PgExecutor<'e>,
    preparation: &ValidPreparation,
) -> Result<()> {
    sqlx::query("INSERT INTO valid_preparations (id, name) VALUES ($1, $2)")
        .bind(&preparation.id)
        .bind(&preparation.name)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert preparation {}", preparation.id))?;

    Ok(())
}

pub async fn insert_instrument<'e>(
    executor: impl PgExecutor<'e>,
    instrument: &ValidInstrument,
) -> Result<()> {
    sqlx::query("INSERT INTO valid_instruments (id, name) VALUES ($1, $2)")
        .bind(&instrument.id)
        .bind(&instrument.name)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert instrument {}", instrument.id))?;

    Ok(())
}

pub async fn insert_vessel<'e>(executor: impl PgExecutor<'e>, vessel: &ValidVessel) -> Result<()> {
    sqlx::query("INSERT INTO valid_vessels (id, name) VALUES ($1, $2)")
        .bind(&vessel.id)
        .bind(&vessel.name)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert vessel {}", vessel.id))?;

    Ok(())
}

pub async fn insert_ingredient_state<'e>(
    executor: impl PgExecutor<'e>,
    state: &ValidIngredientState,
) -> Result<()> {
    sqlx::query("INSERT INTO valid_ingredient_states (id, name) VALUES ($1, $2)")
        .bind(&state.id)
        .bind(&state.name)
        .execute(executor)
        .await
        .with_context(|| format!("failed to insert ingredient state {}", state.id))?;

    Ok(())
}

pub async fn insert_conversion<'e>(
    executor: impl PgExecutor<'e>,
    conversion: &ValidMeasurementUnitConversion,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO valid_measurement_unit_conversions \
         (id, from_unit, to_unit, only_for_ingredient, modifier) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&conversion.id)
    .bind(&conversion.from_unit)
    .bind(&conversion.to_unit)
    .bind(&conversion.only_for_ingredient)
    .bind(conversion.modifier)
    .execute(executor)
    .await
    .with_context(|| format!("failed to insert unit conversion {}", conversion.id))?;

    Ok(())
}
