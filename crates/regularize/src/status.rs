use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{CompletionStatus, MappingKind, PairKey, RegularizationMapping, UncuratedPair, ValueId};
use crate::source::{MappingStore, RawRecordStore};
use crate::Result;

/// Completion of one pair from its mapping rows and the model years
/// actually present in untrusted data.
///
/// Complete requires a Wildcard VehicleType and a resolving Triplet (any
/// explicit fuel type, `Unspecified` included) for every raw year.
pub fn completion_status(rows: &[RegularizationMapping], raw_model_years: &[ValueId]) -> CompletionStatus {
    if rows.is_empty() {
        return CompletionStatus::Unassigned;
    }

    let mut has_vehicle_type = false;
    let mut resolved_years = HashSet::new();
    for row in rows {
        match row.kind {
            MappingKind::Wildcard { vehicle_type_id } => has_vehicle_type |= vehicle_type_id.is_some(),
            MappingKind::Triplet {
                model_year_id,
                fuel_type_id: Some(_),
            } => {
                resolved_years.insert(model_year_id);
            }
            MappingKind::Triplet { fuel_type_id: None, .. } => {}
        }
    }

    if has_vehicle_type && raw_model_years.iter().all(|y| resolved_years.contains(y)) {
        CompletionStatus::Complete
    } else {
        CompletionStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub unassigned: usize,
    pub partial: usize,
    pub complete: usize,
}

/// Status of every listed pair, published as one immutable snapshot.
#[derive(Debug, Clone)]
pub enum StatusBoard {
    /// The mapping set is empty; every pair is Unassigned.
    AllUnassigned,
    Evaluated(HashMap<PairKey, CompletionStatus>),
}

impl StatusBoard {
    /// Pairs missing from the board degrade to Unassigned.
    pub fn status(&self, pair: PairKey) -> CompletionStatus {
        match self {
            Self::AllUnassigned => CompletionStatus::Unassigned,
            Self::Evaluated(statuses) => statuses
                .get(&pair)
                .copied()
                .unwrap_or(CompletionStatus::Unassigned),
        }
    }

    pub fn evaluate(pairs: &[UncuratedPair], mappings: Vec<RegularizationMapping>) -> Self {
        if mappings.is_empty() {
            return Self::AllUnassigned;
        }

        let mut by_pair: HashMap<PairKey, Vec<RegularizationMapping>> = HashMap::new();
        for row in mappings {
            by_pair.entry(row.pair).or_default().push(row);
        }

        let statuses = pairs
            .iter()
            .map(|p| {
                let rows = by_pair.get(&p.pair).map(Vec::as_slice).unwrap_or_default();
                (p.pair, completion_status(rows, &p.raw_model_years_present()))
            })
            .collect();
        Self::Evaluated(statuses)
    }

    pub fn summary(&self, pairs: &[UncuratedPair]) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for pair in pairs {
            match self.status(pair.pair) {
                CompletionStatus::Unassigned => summary.unassigned += 1,
                CompletionStatus::Partial => summary.partial += 1,
                CompletionStatus::Complete => summary.complete += 1,
            }
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct CompletionStatusEngine<'a> {
    records: &'a dyn RawRecordStore,
    mappings: &'a dyn MappingStore,
}

impl<'a> CompletionStatusEngine<'a> {
    pub fn new(records: &'a dyn RawRecordStore, mappings: &'a dyn MappingStore) -> Self {
        Self { records, mappings }
    }

    /// Single-pair evaluation for the interactive path.
    pub fn status(&self, pair: PairKey) -> Result<CompletionStatus> {
        let rows = self.mappings.mappings_for_pair(pair)?;
        if rows.is_empty() {
            return Ok(CompletionStatus::Unassigned);
        }
        let years = self.records.model_years_for_pair(pair)?;
        Ok(completion_status(&rows, &years))
    }

    /// O(1) answer when no mappings exist; `None` means a full sweep is needed.
    pub fn quick_board(&self) -> Result<Option<StatusBoard>> {
        if self.mappings.has_mappings()? {
            Ok(None)
        } else {
            Ok(Some(StatusBoard::AllUnassigned))
        }
    }

    /// Full per-pair evaluation. Meant for background sweeps.
    pub fn full_board(&self, pairs: &[UncuratedPair]) -> Result<StatusBoard> {
        if let Some(board) = self.quick_board()? {
            return Ok(board);
        }
        Ok(StatusBoard::evaluate(pairs, self.mappings.all_mappings()?))
    }
}
