//! Filter expansion over raw records.
//!
//! A trusted row matches by direct column equality only. An untrusted row
//! additionally matches through the mapping rows of its raw (make, model):
//!
//! - Make / Model: once the raw pair has mapping rows, the row is read as the
//!   mapped canonical pair, for both dimensions at once. Make and Model are
//!   therefore tested together against the same mapping row. Selecting the
//!   raw codes of a mapped pair no longer finds its records; they match
//!   only through the canonical pair.
//! - VehicleType: NULL column, Wildcard row carrying a selected value.
//! - FuelType: NULL column, Triplet for the row's own model year carrying a
//!   selected value.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::predicate::{Correlation, MappingColumn, Predicate, RecordColumn, SqlPredicate};
use crate::model::ValueId;

/// Selected canonical values per dimension. An empty set leaves the
/// dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub makes: BTreeSet<ValueId>,
    #[serde(default)]
    pub models: BTreeSet<ValueId>,
    #[serde(default)]
    pub fuel_types: BTreeSet<ValueId>,
    #[serde(default)]
    pub vehicle_types: BTreeSet<ValueId>,
    #[serde(default = "default_enabled")]
    pub regularization_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FilterSelection {
    pub fn new() -> Self {
        Self {
            regularization_enabled: true,
            ..Self::default()
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.makes.is_empty()
            && self.models.is_empty()
            && self.fuel_types.is_empty()
            && self.vehicle_types.is_empty()
    }
}

pub struct QueryExpander;

impl QueryExpander {
    pub fn expand(selection: &FilterSelection) -> Predicate {
        if !selection.regularization_enabled {
            return Predicate::and(
                [
                    (RecordColumn::Make, &selection.makes),
                    (RecordColumn::Model, &selection.models),
                    (RecordColumn::FuelType, &selection.fuel_types),
                    (RecordColumn::VehicleType, &selection.vehicle_types),
                ]
                .into_iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(column, values)| Predicate::is_in(column, values.iter().copied())),
            );
        }

        Predicate::and([
            make_model(selection),
            attribute(
                RecordColumn::VehicleType,
                &selection.vehicle_types,
                Correlation::Wildcard,
                MappingColumn::VehicleType,
            ),
            attribute(
                RecordColumn::FuelType,
                &selection.fuel_types,
                Correlation::SameModelYear,
                MappingColumn::FuelType,
            ),
        ])
    }

    pub fn expand_sql(selection: &FilterSelection) -> SqlPredicate {
        Self::expand(selection).to_sql()
    }
}

fn untrusted() -> Predicate {
    Predicate::not(Predicate::TrustedYear)
}

fn make_model(selection: &FilterSelection) -> Predicate {
    let mut direct = Vec::new();
    let mut filters = Vec::new();
    if !selection.makes.is_empty() {
        direct.push(Predicate::is_in(RecordColumn::Make, selection.makes.iter().copied()));
        filters.push((MappingColumn::CanonicalMake, selection.makes.iter().copied().collect()));
    }
    if !selection.models.is_empty() {
        direct.push(Predicate::is_in(RecordColumn::Model, selection.models.iter().copied()));
        filters.push((MappingColumn::CanonicalModel, selection.models.iter().copied().collect()));
    }
    if direct.is_empty() {
        return Predicate::True;
    }

    // Rows read through their raw columns: trusted, or raw pair unmapped.
    let raw_columns = Predicate::or([
        Predicate::TrustedYear,
        Predicate::not(Predicate::MappingExists {
            correlation: Correlation::Pair,
            filters: Vec::new(),
        }),
    ]);

    Predicate::or([
        Predicate::and(std::iter::once(raw_columns).chain(direct)),
        Predicate::and([
            untrusted(),
            Predicate::MappingExists {
                correlation: Correlation::Pair,
                filters,
            },
        ]),
    ])
}

fn attribute(
    column: RecordColumn,
    selected: &BTreeSet<ValueId>,
    correlation: Correlation,
    mapping_column: MappingColumn,
) -> Predicate {
    if selected.is_empty() {
        return Predicate::True;
    }
    Predicate::or([
        Predicate::is_in(column, selected.iter().copied()),
        Predicate::and([
            Predicate::IsNull(column),
            untrusted(),
            Predicate::MappingExists {
                correlation,
                filters: vec![(mapping_column, selected.iter().copied().collect())],
            },
        ]),
    ])
}
