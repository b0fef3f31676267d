//! Canonical reference tree built from trusted-year records:
//! Make -> Model -> { vehicle type options, model year -> fuel type options }.
//!
//! Absence of a node means "no canonical reference", never an error. A
//! model with zero trusted-year coverage has no node at all.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::NullFuelPolicy;
use crate::error::RegularizeError;
use crate::model::{CanonicalValue, DimensionKind, PairKey, ValueCatalog, ValueId};
use crate::source::TrustedObservation;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A selectable value with the number of trusted records that produced it.
/// Injected placeholders carry `record_count = 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueOption {
    pub value: CanonicalValue,
    pub record_count: u64,
}

impl ValueOption {
    pub fn is_placeholder(&self) -> bool {
        self.value.is_unspecified()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelNode {
    pub model: CanonicalValue,
    /// Union of vehicle types observed for the model across trusted years.
    pub vehicle_type_options: Vec<ValueOption>,
    /// Model year id -> fuel type options, always including `Unspecified`.
    pub model_years: BTreeMap<ValueId, Vec<ValueOption>>,
}

impl ModelNode {
    /// Vehicle type options that count as real candidates.
    pub fn candidate_vehicle_types(&self) -> Vec<&ValueOption> {
        self.vehicle_type_options
            .iter()
            .filter(|o| !o.is_placeholder())
            .collect()
    }

    pub fn fuel_options(&self, model_year_id: ValueId) -> Option<&[ValueOption]> {
        self.model_years.get(&model_year_id).map(Vec::as_slice)
    }

    /// Fuel type options for a year that count as real candidates.
    pub fn candidate_fuel_types(&self, model_year_id: ValueId) -> Vec<&ValueOption> {
        self.fuel_options(model_year_id)
            .unwrap_or_default()
            .iter()
            .filter(|o| !o.is_placeholder())
            .collect()
    }

    /// The year's placeholder option, if the year is covered.
    pub fn placeholder_fuel(&self, model_year_id: ValueId) -> Option<&ValueOption> {
        self.fuel_options(model_year_id)?
            .iter()
            .find(|o| o.is_placeholder())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MakeNode {
    pub make: CanonicalValue,
    pub models: BTreeMap<ValueId, ModelNode>,
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CanonicalHierarchy {
    makes: BTreeMap<ValueId, MakeNode>,
    #[serde(skip)]
    by_code: HashMap<(String, String), PairKey>,
    #[serde(skip)]
    null_fuel_policy: NullFuelPolicy,
}

impl CanonicalHierarchy {
    pub fn node(&self, canonical: PairKey) -> Option<&ModelNode> {
        self.makes
            .get(&canonical.make_id)
            .and_then(|m| m.models.get(&canonical.model_id))
    }

    /// Exact (case-sensitive) code match on both make and model.
    pub fn node_by_code(&self, make_code: &str, model_code: &str) -> Option<(PairKey, &ModelNode)> {
        let key = self
            .by_code
            .get(&(make_code.to_string(), model_code.to_string()))?;
        self.node(*key).map(|node| (*key, node))
    }

    pub fn makes(&self) -> impl Iterator<Item = &MakeNode> {
        self.makes.values()
    }

    pub fn make(&self, make_id: ValueId) -> Option<&MakeNode> {
        self.makes.get(&make_id)
    }

    pub fn model_count(&self) -> usize {
        self.makes.values().map(|m| m.models.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.makes.is_empty()
    }

    pub fn null_fuel_policy(&self) -> NullFuelPolicy {
        self.null_fuel_policy
    }

    /// Whether `fuel_type_id` is in the canonical option set of the
    /// Model x Year. `None` when there is no reference to check against.
    pub fn fuel_allowed(
        &self,
        canonical: PairKey,
        model_year_id: ValueId,
        fuel_type_id: ValueId,
    ) -> Option<bool> {
        let options = self.node(canonical)?.fuel_options(model_year_id)?;
        Some(options.iter().any(|o| o.value.id == fuel_type_id))
    }

    /// Vehicle types an editor may pick for a model: the observed options
    /// plus the placeholder, which is always selectable.
    pub fn selectable_vehicle_types(
        &self,
        canonical: PairKey,
        catalog: &ValueCatalog,
    ) -> Vec<CanonicalValue> {
        let mut values: Vec<CanonicalValue> = self
            .node(canonical)
            .map(|n| n.vehicle_type_options.iter().map(|o| o.value.clone()).collect())
            .unwrap_or_default();
        if let Some(placeholder) = catalog
            .unspecified(DimensionKind::VehicleType)
            .and_then(|id| catalog.get(DimensionKind::VehicleType, id))
        {
            if !values.iter().any(|v| v.id == placeholder.id) {
                values.push(placeholder.clone());
            }
        }
        values
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ModelAccumulator {
    vehicle_types: BTreeMap<ValueId, u64>,
    years: BTreeMap<ValueId, BTreeMap<ValueId, u64>>,
}

pub struct HierarchyBuilder<'a> {
    catalog: &'a ValueCatalog,
    null_fuel_policy: NullFuelPolicy,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(catalog: &'a ValueCatalog, null_fuel_policy: NullFuelPolicy) -> Self {
        Self {
            catalog,
            null_fuel_policy,
        }
    }

    pub fn build(&self, observations: &[TrustedObservation]) -> Result<CanonicalHierarchy, RegularizeError> {
        let unspecified_fuel = self
            .catalog
            .unspecified(DimensionKind::FuelType)
            .ok_or_else(|| RegularizeError::NotFound("fuel_type placeholder UNSPECIFIED".into()))?;

        let mut acc: BTreeMap<PairKey, ModelAccumulator> = BTreeMap::new();
        for obs in observations {
            let entry = acc.entry(obs.pair).or_default();

            if let Some(vehicle_type) = obs.vehicle_type_id {
                *entry.vehicle_types.entry(vehicle_type).or_insert(0) += obs.record_count;
            }

            let Some(model_year) = obs.model_year_id else {
                continue;
            };
            let fuels = entry.years.entry(model_year).or_default();
            match (obs.fuel_type_id, self.null_fuel_policy) {
                (Some(fuel), _) => *fuels.entry(fuel).or_insert(0) += obs.record_count,
                (None, NullFuelPolicy::AssignUnspecified) => {
                    *fuels.entry(unspecified_fuel).or_insert(0) += obs.record_count;
                }
                // Year stays covered, with only the injected placeholder.
                (None, NullFuelPolicy::NoReference) => {}
            }
        }

        let mut hierarchy = CanonicalHierarchy {
            null_fuel_policy: self.null_fuel_policy,
            ..CanonicalHierarchy::default()
        };

        for (pair, model_acc) in acc {
            let (Some(make), Some(model)) = (
                self.catalog.get(DimensionKind::Make, pair.make_id),
                self.catalog.get(DimensionKind::Model, pair.model_id),
            ) else {
                log::warn!("trusted records reference unknown {pair}; skipped");
                continue;
            };

            let vehicle_type_options = self.options(DimensionKind::VehicleType, &model_acc.vehicle_types);

            let mut model_years = BTreeMap::new();
            for (year, mut fuels) in model_acc.years {
                fuels.entry(unspecified_fuel).or_insert(0);
                model_years.insert(year, self.options(DimensionKind::FuelType, &fuels));
            }

            hierarchy
                .by_code
                .insert((make.code.clone(), model.code.clone()), pair);
            hierarchy
                .makes
                .entry(pair.make_id)
                .or_insert_with(|| MakeNode {
                    make: make.clone(),
                    models: BTreeMap::new(),
                })
                .models
                .insert(
                    pair.model_id,
                    ModelNode {
                        model: model.clone(),
                        vehicle_type_options,
                        model_years,
                    },
                );
        }

        log::debug!(
            "canonical hierarchy: {} makes, {} models",
            hierarchy.makes.len(),
            hierarchy.model_count()
        );
        Ok(hierarchy)
    }

    /// Resolve counted ids to options, most observed first.
    fn options(&self, kind: DimensionKind, counts: &BTreeMap<ValueId, u64>) -> Vec<ValueOption> {
        let mut options: Vec<ValueOption> = counts
            .iter()
            .filter_map(|(id, count)| match self.catalog.get(kind, *id) {
                Some(value) => Some(ValueOption {
                    value: value.clone(),
                    record_count: *count,
                }),
                None => {
                    log::warn!("trusted records reference unknown {kind} {id}; skipped");
                    None
                }
            })
            .collect();
        options.sort_by(|a, b| {
            b.record_count
                .cmp(&a.record_count)
                .then(a.value.id.cmp(&b.value.id))
        });
        options
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::UNSPECIFIED_CODE;

    pub(crate) const ACME: ValueId = ValueId(1);
    pub(crate) const X1: ValueId = ValueId(10);
    pub(crate) const X2: ValueId = ValueId(11);
    pub(crate) const GAS: ValueId = ValueId(100);
    pub(crate) const ELEC: ValueId = ValueId(101);
    pub(crate) const FUEL_U: ValueId = ValueId(199);
    pub(crate) const CAR: ValueId = ValueId(200);
    pub(crate) const TRUCK: ValueId = ValueId(201);
    pub(crate) const VT_U: ValueId = ValueId(299);

    fn value(id: ValueId, kind: DimensionKind, code: &str) -> CanonicalValue {
        CanonicalValue {
            id,
            kind,
            code: code.into(),
            description: code.into(),
        }
    }

    pub(crate) fn catalog() -> ValueCatalog {
        let mut values = vec![
            value(ACME, DimensionKind::Make, "ACME"),
            value(X1, DimensionKind::Model, "X1"),
            value(X2, DimensionKind::Model, "X2"),
            value(GAS, DimensionKind::FuelType, "E"),
            value(ELEC, DimensionKind::FuelType, "L"),
            value(FUEL_U, DimensionKind::FuelType, UNSPECIFIED_CODE),
            value(CAR, DimensionKind::VehicleType, "PAU"),
            value(TRUCK, DimensionKind::VehicleType, "CAM"),
            value(VT_U, DimensionKind::VehicleType, UNSPECIFIED_CODE),
        ];
        for year in 2008..=2022 {
            values.push(value(ValueId(year), DimensionKind::ModelYear, &year.to_string()));
        }
        ValueCatalog::from_values(values)
    }

    pub(crate) fn obs(
        model: ValueId,
        year: Option<i64>,
        fuel: Option<ValueId>,
        vehicle: Option<ValueId>,
        count: u64,
    ) -> TrustedObservation {
        TrustedObservation {
            pair: PairKey::new(ACME, model),
            model_year_id: year.map(ValueId),
            fuel_type_id: fuel,
            vehicle_type_id: vehicle,
            record_count: count,
        }
    }

    #[test]
    fn groups_years_and_injects_placeholder() {
        let catalog = catalog();
        let observations = vec![
            obs(X1, Some(2015), Some(GAS), Some(CAR), 5),
            obs(X1, Some(2018), Some(ELEC), Some(CAR), 3),
        ];
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&observations)
            .unwrap();

        let node = h.node(PairKey::new(ACME, X1)).unwrap();
        assert_eq!(node.model_years.len(), 2);
        let y2015 = node.fuel_options(ValueId(2015)).unwrap();
        assert_eq!(y2015.len(), 2);
        assert_eq!(y2015[0].value.id, GAS);
        assert_eq!(y2015[0].record_count, 5);
        let placeholder = node.placeholder_fuel(ValueId(2015)).unwrap();
        assert_eq!(placeholder.record_count, 0);
        assert_eq!(node.candidate_fuel_types(ValueId(2015)).len(), 1);
        assert_eq!(node.vehicle_type_options.len(), 1);
        assert_eq!(node.vehicle_type_options[0].record_count, 8);
    }

    #[test]
    fn model_without_trusted_coverage_has_no_node() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[obs(X1, Some(2015), Some(GAS), None, 1)])
            .unwrap();
        assert!(h.node(PairKey::new(ACME, X2)).is_none());
        assert!(h.node_by_code("ACME", "X2").is_none());
        assert_eq!(h.model_count(), 1);
    }

    #[test]
    fn observed_placeholder_is_not_duplicated() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[
                obs(X1, Some(2015), Some(FUEL_U), None, 2),
                obs(X1, Some(2015), Some(GAS), None, 1),
            ])
            .unwrap();
        let options = h.node(PairKey::new(ACME, X1)).unwrap().fuel_options(ValueId(2015)).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options.iter().filter(|o| o.is_placeholder()).count(), 1);
    }

    #[test]
    fn vehicle_types_are_union_across_years() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[
                obs(X1, Some(2015), Some(GAS), Some(CAR), 1),
                obs(X1, Some(2016), Some(GAS), Some(TRUCK), 4),
                obs(X1, None, None, Some(CAR), 1),
            ])
            .unwrap();
        let node = h.node(PairKey::new(ACME, X1)).unwrap();
        let ids: Vec<ValueId> = node.vehicle_type_options.iter().map(|o| o.value.id).collect();
        assert_eq!(ids, vec![TRUCK, CAR]);
        // NULL model year contributes no year entry
        assert_eq!(node.model_years.len(), 2);
    }

    #[test]
    fn null_fuel_no_reference_leaves_only_placeholder() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[obs(X1, Some(2008), None, Some(CAR), 9)])
            .unwrap();
        let node = h.node(PairKey::new(ACME, X1)).unwrap();
        let options = node.fuel_options(ValueId(2008)).unwrap();
        assert_eq!(options.len(), 1);
        assert!(options[0].is_placeholder());
        assert_eq!(options[0].record_count, 0);
    }

    #[test]
    fn null_fuel_assign_unspecified_counts_placeholder() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::AssignUnspecified)
            .build(&[obs(X1, Some(2008), None, Some(CAR), 9)])
            .unwrap();
        let node = h.node(PairKey::new(ACME, X1)).unwrap();
        assert_eq!(node.placeholder_fuel(ValueId(2008)).unwrap().record_count, 9);
        assert_eq!(h.null_fuel_policy(), NullFuelPolicy::AssignUnspecified);
    }

    #[test]
    fn fuel_allowed_checks_option_set() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[obs(X1, Some(2015), Some(GAS), None, 1)])
            .unwrap();
        let pair = PairKey::new(ACME, X1);
        assert_eq!(h.fuel_allowed(pair, ValueId(2015), GAS), Some(true));
        assert_eq!(h.fuel_allowed(pair, ValueId(2015), FUEL_U), Some(true));
        assert_eq!(h.fuel_allowed(pair, ValueId(2015), ELEC), Some(false));
        assert_eq!(h.fuel_allowed(pair, ValueId(2016), ELEC), None);
    }

    #[test]
    fn selectable_vehicle_types_include_placeholder() {
        let catalog = catalog();
        let h = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[obs(X1, Some(2015), Some(GAS), Some(CAR), 1)])
            .unwrap();
        let values = h.selectable_vehicle_types(PairKey::new(ACME, X1), &catalog);
        let ids: Vec<ValueId> = values.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![CAR, VT_U]);
        assert_eq!(h.selectable_vehicle_types(PairKey::new(ACME, X2), &catalog).len(), 1);
    }

    #[test]
    fn missing_placeholder_is_not_found() {
        let catalog = ValueCatalog::new();
        let err = HierarchyBuilder::new(&catalog, NullFuelPolicy::NoReference)
            .build(&[])
            .unwrap_err();
        assert!(matches!(err, RegularizeError::NotFound(_)));
    }
}
