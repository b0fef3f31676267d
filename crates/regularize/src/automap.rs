use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AutoMapConfig, NullFuelPolicy};
use crate::hierarchy::{CanonicalHierarchy, ModelNode};
use crate::model::{DimensionKind, PairAssignment, PairKey, RegularizationMapping, UncuratedPair, ValueCatalog, ValueId};

/// Counters for one auto-mapping run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoMapReport {
    pub pairs_examined: usize,
    /// Pairs skipped because they already had at least one mapping row.
    pub pairs_skipped_existing: usize,
    /// Pairs whose (make, model) codes match a canonical node.
    pub pairs_matched: usize,
    /// Matched pairs with at least one attribute resolved.
    pub pairs_proposed: usize,
    pub pairs_inserted: usize,
    pub rows_inserted: usize,
    /// Proposed pairs that gained rows between proposal and commit.
    pub pairs_skipped_at_commit: usize,
}

/// Exact-match proposer. Assigns a value only when the canonical data leaves
/// exactly one real candidate (or the cardinal list breaks a vehicle type
/// tie); everything ambiguous is left to a human.
pub struct AutoMapper<'a> {
    config: &'a AutoMapConfig,
}

impl<'a> AutoMapper<'a> {
    pub fn new(config: &'a AutoMapConfig) -> Self {
        Self { config }
    }

    /// Proposals for every pair without existing rows, one batch of rows per
    /// pair. Pairs in `existing` are never touched.
    pub fn propose(
        &self,
        hierarchy: &CanonicalHierarchy,
        catalog: &ValueCatalog,
        pairs: &[UncuratedPair],
        existing: &HashSet<PairKey>,
        created_at: DateTime<Utc>,
    ) -> (Vec<Vec<RegularizationMapping>>, AutoMapReport) {
        let mut report = AutoMapReport::default();
        let mut batches = Vec::new();

        for pair in pairs {
            report.pairs_examined += 1;
            if existing.contains(&pair.pair) {
                report.pairs_skipped_existing += 1;
                continue;
            }
            let Some((canonical, node)) = self.match_canonical(hierarchy, catalog, pair.pair) else {
                continue;
            };
            report.pairs_matched += 1;

            let assignment = self.assign(pair.pair, canonical, node, hierarchy.null_fuel_policy());
            if assignment.is_empty() {
                continue;
            }
            report.pairs_proposed += 1;
            batches.push(assignment.to_mappings(Some(pair), created_at));
        }

        (batches, report)
    }

    /// Proposal for a single pair, `None` if nothing resolves.
    pub fn propose_pair(
        &self,
        hierarchy: &CanonicalHierarchy,
        catalog: &ValueCatalog,
        pair: PairKey,
    ) -> Option<PairAssignment> {
        let (canonical, node) = self.match_canonical(hierarchy, catalog, pair)?;
        let assignment = self.assign(pair, canonical, node, hierarchy.null_fuel_policy());
        (!assignment.is_empty()).then_some(assignment)
    }

    fn match_canonical<'h>(
        &self,
        hierarchy: &'h CanonicalHierarchy,
        catalog: &ValueCatalog,
        pair: PairKey,
    ) -> Option<(PairKey, &'h ModelNode)> {
        let make = catalog.get(DimensionKind::Make, pair.make_id)?;
        let model = catalog.get(DimensionKind::Model, pair.model_id)?;
        hierarchy.node_by_code(&make.code, &model.code)
    }

    fn assign(
        &self,
        pair: PairKey,
        canonical: PairKey,
        node: &ModelNode,
        policy: NullFuelPolicy,
    ) -> PairAssignment {
        let mut assignment = PairAssignment {
            canonical,
            ..PairAssignment::identity(pair)
        };
        assignment.vehicle_type_id = self.pick_vehicle_type(node);
        for &model_year in node.model_years.keys() {
            if let Some(fuel) = pick_fuel_type(node, model_year, policy) {
                assignment.fuel_types.insert(model_year, fuel);
            }
        }
        assignment
    }

    fn pick_vehicle_type(&self, node: &ModelNode) -> Option<ValueId> {
        let candidates = node.candidate_vehicle_types();
        if let [only] = candidates.as_slice() {
            return Some(only.value.id);
        }
        self.config.cardinal_vehicle_types.iter().find_map(|code| {
            candidates
                .iter()
                .find(|o| &o.value.code == code)
                .map(|o| o.value.id)
        })
    }
}

fn pick_fuel_type(node: &ModelNode, model_year: ValueId, policy: NullFuelPolicy) -> Option<ValueId> {
    let candidates = node.candidate_fuel_types(model_year);
    match (candidates.as_slice(), policy) {
        ([only], _) => Some(only.value.id),
        ([], NullFuelPolicy::AssignUnspecified) => node
            .placeholder_fuel(model_year)
            .filter(|p| p.record_count > 0)
            .map(|p| p.value.id),
        _ => None,
    }
}
