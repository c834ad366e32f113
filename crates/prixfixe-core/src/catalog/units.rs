//! Measurement unit conversion over the catalog's conversion edges.
//!
//! An edge `from -> to` with modifier `m` means `1 from == m to`. The inverse
//! of every edge is implied (`1/m`) unless an explicit edge exists in that
//! direction. Edges restricted to an ingredient apply only when converting
//! that ingredient, and for that ingredient they replace any generic edge
//! between the same pair of units.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use prixfixe_db::models::ValidMeasurementUnitConversion;

use crate::error::{EngineError, EngineResult};

/// Relative tolerance for cycle consistency.
pub const CONSISTENCY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct UnitConverter {
    /// Explicit edges keyed by `(from, to)`.
    edges: HashMap<(String, String), Vec<ValidMeasurementUnitConversion>>,
    /// Undirected adjacency, ordered for deterministic search.
    neighbors: BTreeMap<String, BTreeSet<String>>,
}

impl UnitConverter {
    /// Build a converter and verify that every cycle round-trips to 1.
    pub fn new(conversions: &[ValidMeasurementUnitConversion]) -> EngineResult<Self> {
        let mut converter = Self::default();
        for c in conversions {
            converter
                .edges
                .entry((c.from_unit.clone(), c.to_unit.clone()))
                .or_default()
                .push(c.clone());
            converter
                .neighbors
                .entry(c.from_unit.clone())
                .or_default()
                .insert(c.to_unit.clone());
            converter
                .neighbors
                .entry(c.to_unit.clone())
                .or_default()
                .insert(c.from_unit.clone());
        }
        converter.check_consistency()?;
        Ok(converter)
    }

    /// Multiplier that turns a quantity in `from` into one in `to`, or `None`
    /// when the units are not connected for this ingredient.
    pub fn convert(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        if let Some(direct) = self.edge_weight(from, to, ingredient) {
            return Some(direct);
        }
        self.shortest_path(from, to, ingredient)
    }

    fn explicit(&self, from: &str, to: &str, only_for: Option<&str>) -> Option<f64> {
        self.edges
            .get(&(from.to_owned(), to.to_owned()))?
            .iter()
            .find(|e| e.only_for_ingredient.as_deref() == only_for)
            .map(|e| e.modifier)
    }

    fn has_specific(&self, a: &str, b: &str, ingredient: &str) -> bool {
        self.explicit(a, b, Some(ingredient)).is_some()
            || self.explicit(b, a, Some(ingredient)).is_some()
    }

    /// Weight of the single hop `from -> to`, honoring ingredient overrides
    /// and implied inverses.
    fn edge_weight(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<f64> {
        let scope = match ingredient {
            Some(ing) if self.has_specific(from, to, ing) => Some(ing),
            _ => None,
        };
        self.explicit(from, to, scope)
            .or_else(|| self.explicit(to, from, scope).map(|m| 1.0 / m))
    }

    /// Breadth-first search; the multiplier is the product of hop weights
    /// along the first shortest path found.
    fn shortest_path(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<f64> {
        let mut factor: HashMap<&str, f64> = HashMap::new();
        let mut queue = VecDeque::new();
        factor.insert(from, 1.0);
        queue.push_back(from);

        while let Some(unit) = queue.pop_front() {
            let here = factor[unit];
            let Some(next) = self.neighbors.get(unit) else {
                continue;
            };
            for n in next {
                if factor.contains_key(n.as_str()) {
                    continue;
                }
                let Some(w) = self.edge_weight(unit, n, ingredient) else {
                    continue;
                };
                let value = here * w;
                if n == to {
                    return Some(value);
                }
                factor.insert(n.as_str(), value);
                queue.push_back(n.as_str());
            }
        }
        None
    }

    /// Assign every unit a factor relative to its component root and verify
    /// each explicit edge against those factors, once for generic edges and
    /// once per ingredient that has overrides.
    fn check_consistency(&self) -> EngineResult<()> {
        let mut scopes: BTreeSet<Option<&str>> = BTreeSet::new();
        scopes.insert(None);
        for edges in self.edges.values() {
            for e in edges {
                if let Some(ing) = e.only_for_ingredient.as_deref() {
                    scopes.insert(Some(ing));
                }
            }
        }

        for scope in scopes {
            let mut factor: HashMap<&str, f64> = HashMap::new();
            for root in self.neighbors.keys() {
                if factor.contains_key(root.as_str()) {
                    continue;
                }
                factor.insert(root.as_str(), 1.0);
                let mut queue = VecDeque::from([root.as_str()]);
                while let Some(unit) = queue.pop_front() {
                    let here = factor[unit];
                    for n in &self.neighbors[unit] {
                        if factor.contains_key(n.as_str()) {
                            continue;
                        }
                        if let Some(w) = self.edge_weight(unit, n, scope) {
                            factor.insert(n.as_str(), here * w);
                            queue.push_back(n.as_str());
                        }
                    }
                }
            }

            for ((from, to), edges) in &self.edges {
                for e in edges {
                    let applies = match (scope, e.only_for_ingredient.as_deref()) {
                        (None, None) => true,
                        (Some(ing), Some(only)) => ing == only,
                        (Some(ing), None) => !self.has_specific(from, to, ing),
                        (None, Some(_)) => false,
                    };
                    if !applies {
                        continue;
                    }
                    let (Some(f_from), Some(f_to)) =
                        (factor.get(from.as_str()), factor.get(to.as_str()))
                    else {
                        continue;
                    };
                    let expected = f_from * e.modifier;
                    let rel = (expected - f_to).abs() / f_to.abs().max(f64::MIN_POSITIVE);
                    if rel > CONSISTENCY_TOLERANCE {
                        return Err(EngineError::ConversionGraphInconsistent(format!(
                            "edge {} ({from} -> {to}, x{}) disagrees with other paths{}",
                            e.id,
                            e.modifier,
                            scope
                                .map(|i| format!(" for ingredient {i}"))
                                .unwrap_or_default()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: &str, from: &str, to: &str, m: f64, only: Option<&str>) -> ValidMeasurementUnitConversion {
        ValidMeasurementUnitConversion {
            id: id.to_owned(),
            from_unit: from.to_owned(),
            to_unit: to.to_owned(),
            only_for_ingredient: only.map(str::to_owned),
            modifier: m,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn same_unit_is_identity() {
        let c = UnitConverter::new(&[]).unwrap();
        assert_eq!(c.convert("g", "g", None), Some(1.0));
    }

    #[test]
    fn direct_and_implied_inverse() {
        let c = UnitConverter::new(&[edge("1", "lb", "g", 453.592, None)]).unwrap();
        assert_eq!(c.convert("lb", "g", None), Some(453.592));
        assert!(close(c.convert("g", "lb", None).unwrap(), 1.0 / 453.592));
    }

    #[test]
    fn transitive_path() {
        let c = UnitConverter::new(&[
            edge("1", "kg", "g", 1000.0, None),
            edge("2", "lb", "g", 453.592, None),
        ])
        .unwrap();
        assert!(close(c.convert("kg", "lb", None).unwrap(), 1000.0 / 453.592));
    }

    #[test]
    fn unreachable_is_none() {
        let c = UnitConverter::new(&[
            edge("1", "kg", "g", 1000.0, None),
            edge("2", "cup", "ml", 240.0, None),
        ])
        .unwrap();
        assert_eq!(c.convert("g", "ml", None), None);
        assert_eq!(c.convert("g", "pinch", None), None);
    }

    #[test]
    fn ingredient_specific_edge_is_preferred_and_scoped() {
        let c = UnitConverter::new(&[
            edge("1", "cup", "g", 240.0, None),
            edge("2", "cup", "g", 120.0, Some("flour")),
            edge("3", "cup", "ml", 240.0, None),
        ])
        .unwrap();
        assert_eq!(c.convert("cup", "g", Some("flour")), Some(120.0));
        assert_eq!(c.convert("cup", "g", Some("water")), Some(240.0));
        assert_eq!(c.convert("cup", "g", None), Some(240.0));
        // Ingredient-only edges are invisible without that ingredient.
        let only = UnitConverter::new(&[edge("4", "clove", "g", 5.0, Some("garlic"))]).unwrap();
        assert_eq!(only.convert("clove", "g", None), None);
        assert_eq!(only.convert("clove", "g", Some("garlic")), Some(5.0));
    }

    #[test]
    fn explicit_reverse_edge_wins_over_implied_inverse() {
        let c = UnitConverter::new(&[
            edge("1", "a", "b", 2.0, None),
            edge("2", "b", "a", 0.5, None),
        ])
        .unwrap();
        assert_eq!(c.convert("b", "a", None), Some(0.5));
    }

    #[test]
    fn inconsistent_cycle_is_rejected() {
        let err = UnitConverter::new(&[
            edge("1", "kg", "g", 1000.0, None),
            edge("2", "lb", "g", 453.592, None),
            edge("3", "kg", "lb", 2.0, None),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "conversion_graph_inconsistent");
    }

    #[test]
    fn inconsistent_reverse_pair_is_rejected() {
        let err = UnitConverter::new(&[
            edge("1", "a", "b", 2.0, None),
            edge("2", "b", "a", 0.4, None),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::ConversionGraphInconsistent(_)));
    }

    #[test]
    fn consistent_cycle_within_tolerance_is_accepted() {
        UnitConverter::new(&[
            edge("1", "kg", "g", 1000.0, None),
            edge("2", "g", "mg", 1000.0, None),
            edge("3", "kg", "mg", 1_000_000.0 * (1.0 + 1e-8), None),
        ])
        .expect("within tolerance");
    }

    #[test]
    fn override_does_not_conflict_with_generic_edge() {
        UnitConverter::new(&[
            edge("1", "cup", "g", 240.0, None),
            edge("2", "cup", "g", 120.0, Some("flour")),
        ])
        .expect("ingredient override is its own scope");
    }
}
