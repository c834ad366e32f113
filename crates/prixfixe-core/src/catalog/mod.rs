//! Reference catalog: an immutable snapshot of the taxonomy tables.
//!
//! The engine reads the catalog through a [`CatalogHandle`]. A reload builds a
//! fresh [`Catalog`] and swaps the shared pointer, so readers holding an older
//! snapshot keep a consistent view until they drop it.

pub mod units;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::info;

use prixfixe_db::models::{
    ValidIngredient, ValidIngredientState, ValidInstrument, ValidMeasurementUnit,
    ValidMeasurementUnitConversion, ValidPreparation, ValidVessel,
};
use prixfixe_db::queries::catalog::{self as db, CatalogRows};

use crate::error::EngineResult;

pub use units::UnitConverter;

#[derive(Debug, Default)]
pub struct Catalog {
    units: HashMap<String, ValidMeasurementUnit>,
    ingredients: HashMap<String, ValidIngredient>,
    preparations: HashSet<String>,
    instruments: HashSet<String>,
    vessels: HashSet<String>,
    ingredient_states: HashSet<String>,
    converter: UnitConverter,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Build a snapshot from raw rows, validating the conversion graph.
    pub fn from_rows(rows: CatalogRows) -> EngineResult<Self> {
        let converter = UnitConverter::new(&rows.conversions)?;
        Ok(Self {
            units: rows.units.into_iter().map(|u| (u.id.clone(), u)).collect(),
            ingredients: rows
                .ingredients
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
            preparations: rows.preparations.into_iter().map(|p| p.id).collect(),
            instruments: rows.instruments.into_iter().map(|i| i.id).collect(),
            vessels: rows.vessels.into_iter().map(|v| v.id).collect(),
            ingredient_states: rows.ingredient_states.into_iter().map(|s| s.id).collect(),
            converter,
        })
    }

    /// Read the catalog tables and build a snapshot.
    pub async fn load(pool: &PgPool) -> EngineResult<Self> {
        let rows = db::load_catalog_rows(pool).await?;
        let catalog = Self::from_rows(rows)?;
        info!(
            units = catalog.units.len(),
            ingredients = catalog.ingredients.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn unit(&self, id: &str) -> Option<&ValidMeasurementUnit> {
        self.units.get(id)
    }

    pub fn ingredient(&self, id: &str) -> Option<&ValidIngredient> {
        self.ingredients.get(id)
    }

    pub fn has_preparation(&self, id: &str) -> bool {
        self.preparations.contains(id)
    }

    pub fn has_instrument(&self, id: &str) -> bool {
        self.instruments.contains(id)
    }

    pub fn has_vessel(&self, id: &str) -> bool {
        self.vessels.contains(id)
    }

    pub fn has_ingredient_state(&self, id: &str) -> bool {
        self.ingredient_states.contains(id)
    }

    pub fn is_universal(&self, unit_id: &str) -> bool {
        self.units.get(unit_id).is_some_and(|u| u.universal)
    }

    /// See [`UnitConverter::convert`].
    pub fn convert(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<f64> {
        self.converter.convert(from, to, ingredient)
    }
}

/// Accumulates catalog rows in memory; used by tests and seeding tools.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    rows: CatalogRows,
}

impl CatalogBuilder {
    pub fn unit(mut self, unit: ValidMeasurementUnit) -> Self {
        self.rows.units.push(unit);
        self
    }

    pub fn ingredient(mut self, ingredient: ValidIngredient) -> Self {
        self.rows.ingredients.push(ingredient);
        self
    }

    pub fn preparation(mut self, id: &str) -> Self {
        self.rows.preparations.push(ValidPreparation {
            id: id.to_owned(),
            name: id.to_owned(),
        });
        self
    }

    pub fn instrument(mut self, id: &str) -> Self {
        self.rows.instruments.push(ValidInstrument {
            id: id.to_owned(),
            name: id.to_owned(),
        });
        self
    }

    pub fn vessel(mut self, id: &str) -> Self {
        self.rows.vessels.push(ValidVessel {
            id: id.to_owned(),
            name: id.to_owned(),
        });
        self
    }

    pub fn ingredient_state(mut self, id: &str) -> Self {
        self.rows.ingredient_states.push(ValidIngredientState {
            id: id.to_owned(),
            name: id.to_owned(),
        });
        self
    }

    pub fn conversion(mut self, conversion: ValidMeasurementUnitConversion) -> Self {
        self.rows.conversions.push(conversion);
        self
    }

    pub fn build(self) -> EngineResult<Catalog> {
        Catalog::from_rows(self.rows)
    }
}

/// Process-wide, hot-swappable catalog pointer.
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// The current snapshot. Cheap; holds the lock only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().clone()
    }

    pub fn replace(&self, catalog: Catalog) {
        *self.current.write() = Arc::new(catalog);
    }

    /// Rebuild from the database and swap. On failure the previous snapshot
    /// stays in place.
    pub async fn reload(&self, pool: &PgPool) -> EngineResult<()> {
        let fresh = Catalog::load(pool).await?;
        self.replace(fresh);
        Ok(())
    }
}
