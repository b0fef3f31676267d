//! Storage seams. The engine never talks SQL; `catreg-store` implements
//! both traits on SQLite.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{MappingKey, PairKey, RegularizationMapping, UncuratedPair, ValueCatalog, ValueId};
use crate::Result;

/// Trusted-year records grouped by (make, model, model year, fuel type,
/// vehicle type). Rows with a NULL make or model are never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedObservation {
    pub pair: PairKey,
    pub model_year_id: Option<ValueId>,
    pub fuel_type_id: Option<ValueId>,
    pub vehicle_type_id: Option<ValueId>,
    pub record_count: u64,
}

/// Relational store of fact rows partitioned into trusted and untrusted
/// data years.
pub trait RawRecordStore: Send + Sync {
    /// Counter bumped on every change to raw records, enumerations or the
    /// trusted-year set. Snapshots built for an older version are stale.
    fn data_version(&self) -> Result<u64>;

    fn value_catalog(&self) -> Result<ValueCatalog>;

    fn trusted_observations(&self) -> Result<Vec<TrustedObservation>>;

    /// Pairs present in untrusted years and absent from trusted years.
    /// Implementations must use correlated `NOT EXISTS`: a `NOT IN` against
    /// a trusted set containing a NULL make or model yields no rows at all.
    fn find_uncurated_pairs(&self) -> Result<Vec<UncuratedPair>>;

    /// Every pair present in untrusted years, trusted-known or not.
    fn find_untrusted_pairs(&self) -> Result<Vec<UncuratedPair>>;

    /// Distinct model years observed for the pair in untrusted years.
    fn model_years_for_pair(&self, pair: PairKey) -> Result<Vec<ValueId>>;

    /// Coverage of one pair in untrusted years, `None` if it has no rows.
    fn untrusted_pair(&self, pair: PairKey) -> Result<Option<UncuratedPair>>;
}

/// Outcome of an insert-only batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub pairs_inserted: usize,
    pub rows_inserted: usize,
    /// Pairs that already had rows when the transaction ran.
    pub pairs_skipped: usize,
}

/// Persistence for regularization mapping rows. Unique on
/// (uncurated make, uncurated model, model year or Wildcard).
pub trait MappingStore: Send + Sync {
    fn has_mappings(&self) -> Result<bool>;

    fn mapping_count(&self) -> Result<u64>;

    fn all_mappings(&self) -> Result<Vec<RegularizationMapping>>;

    fn mappings_for_pair(&self, pair: PairKey) -> Result<Vec<RegularizationMapping>>;

    fn mapped_pairs(&self) -> Result<HashSet<PairKey>>;

    /// Insert each batch (all rows of one pair) only if the pair has no rows
    /// yet, all in one transaction. Never updates or deletes.
    fn insert_unmapped(&self, batches: &[Vec<RegularizationMapping>]) -> Result<InsertOutcome>;

    /// Upsert rows, last write wins per uniqueness key, in one transaction.
    /// Re-points the pair's other rows to the saved canonical pair.
    fn save_mappings(&self, rows: &[RegularizationMapping]) -> Result<()>;

    /// Strict insert; an existing row with the same key is a validation error.
    fn insert_mapping(&self, row: &RegularizationMapping) -> Result<()>;

    fn remove_mapping(&self, key: &MappingKey) -> Result<bool>;

    fn clear_pair(&self, pair: PairKey) -> Result<usize>;
}
