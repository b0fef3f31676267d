use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegularizeError;

/// Code of the placeholder value present in every FuelType / VehicleType
/// enumeration. Always selectable, never counted as a real candidate.
pub const UNSPECIFIED_CODE: &str = "UNSPECIFIED";

// ---------------------------------------------------------------------------
// Canonical values
// ---------------------------------------------------------------------------

/// Integer id of a row in one of the enumeration tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub i64);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Make,
    Model,
    ModelYear,
    FuelType,
    VehicleType,
}

impl DimensionKind {
    pub const ALL: [Self; 5] = [
        Self::Make,
        Self::Model,
        Self::ModelYear,
        Self::FuelType,
        Self::VehicleType,
    ];

    /// Kinds whose enumeration always carries the `Unspecified` placeholder.
    pub fn has_placeholder(self) -> bool {
        matches!(self, Self::FuelType | Self::VehicleType)
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Make => write!(f, "make"),
            Self::Model => write!(f, "model"),
            Self::ModelYear => write!(f, "model_year"),
            Self::FuelType => write!(f, "fuel_type"),
            Self::VehicleType => write!(f, "vehicle_type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalValue {
    pub id: ValueId,
    pub kind: DimensionKind,
    pub code: String,
    pub description: String,
}

impl CanonicalValue {
    pub fn is_unspecified(&self) -> bool {
        self.kind.has_placeholder() && self.code == UNSPECIFIED_CODE
    }
}

/// Every enumeration value known to the store, indexed by id and by code.
#[derive(Debug, Clone, Default)]
pub struct ValueCatalog {
    values: HashMap<DimensionKind, BTreeMap<ValueId, CanonicalValue>>,
    by_code: HashMap<(DimensionKind, String), ValueId>,
}

impl ValueCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = CanonicalValue>) -> Self {
        let mut catalog = Self::new();
        for value in values {
            catalog.insert(value);
        }
        catalog
    }

    pub fn insert(&mut self, value: CanonicalValue) {
        self.by_code.insert((value.kind, value.code.clone()), value.id);
        self.values.entry(value.kind).or_default().insert(value.id, value);
    }

    pub fn get(&self, kind: DimensionKind, id: ValueId) -> Option<&CanonicalValue> {
        self.values.get(&kind).and_then(|m| m.get(&id))
    }

    /// Like [`get`](Self::get) but a missing value is a `NotFound` error.
    pub fn require(&self, kind: DimensionKind, id: ValueId) -> Result<&CanonicalValue, RegularizeError> {
        self.get(kind, id)
            .ok_or_else(|| RegularizeError::NotFound(format!("{kind} {id}")))
    }

    pub fn by_code(&self, kind: DimensionKind, code: &str) -> Option<&CanonicalValue> {
        self.by_code
            .get(&(kind, code.to_string()))
            .and_then(|id| self.get(kind, *id))
    }

    pub fn unspecified(&self, kind: DimensionKind) -> Option<ValueId> {
        if !kind.has_placeholder() {
            return None;
        }
        self.by_code.get(&(kind, UNSPECIFIED_CODE.to_string())).copied()
    }

    pub fn values(&self, kind: DimensionKind) -> impl Iterator<Item = &CanonicalValue> {
        self.values.get(&kind).into_iter().flat_map(|m| m.values())
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Pairs
// ---------------------------------------------------------------------------

/// A (Make, Model) id pair, raw or canonical depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub make_id: ValueId,
    pub model_id: ValueId,
}

impl PairKey {
    pub fn new(make_id: ValueId, model_id: ValueId) -> Self {
        Self { make_id, model_id }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "make {} / model {}", self.make_id, self.model_id)
    }
}

/// A (make, model) observed in untrusted years. Computed from raw records on
/// demand; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UncuratedPair {
    pub pair: PairKey,
    pub record_count: u64,
    /// Raw model years observed in untrusted years, with their record counts.
    pub model_years: BTreeMap<ValueId, u64>,
    pub first_data_year: i32,
    pub last_data_year: i32,
    /// The pair also occurs in trusted years.
    pub in_trusted_years: bool,
}

impl UncuratedPair {
    /// Distinct model years actually present in untrusted data. Never
    /// substituted by the canonical hierarchy's range.
    pub fn raw_model_years_present(&self) -> Vec<ValueId> {
        self.model_years.keys().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

/// Scope of a mapping row. Wildcard rows hold the model-level VehicleType,
/// Triplet rows the FuelType of one model year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MappingKind {
    Wildcard {
        vehicle_type_id: Option<ValueId>,
    },
    Triplet {
        model_year_id: ValueId,
        fuel_type_id: Option<ValueId>,
    },
}

impl MappingKind {
    pub fn model_year_id(&self) -> Option<ValueId> {
        match self {
            Self::Wildcard { .. } => None,
            Self::Triplet { model_year_id, .. } => Some(*model_year_id),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }
}

/// Uniqueness key of a mapping row; `model_year_id = None` is the Wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingKey {
    pub pair: PairKey,
    pub model_year_id: Option<ValueId>,
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.model_year_id {
            Some(year) => write!(f, "{} / model_year {year}", self.pair),
            None => write!(f, "{} / *", self.pair),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegularizationMapping {
    /// Raw pair as it appears in untrusted records.
    pub pair: PairKey,
    /// Canonical pair the raw pair resolves to.
    pub canonical: PairKey,
    pub kind: MappingKind,
    pub record_count: u64,
    pub year_range_start: Option<i32>,
    pub year_range_end: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl RegularizationMapping {
    pub fn key(&self) -> MappingKey {
        MappingKey {
            pair: self.pair,
            model_year_id: self.kind.model_year_id(),
        }
    }

    pub fn vehicle_type_id(&self) -> Option<ValueId> {
        match self.kind {
            MappingKind::Wildcard { vehicle_type_id } => vehicle_type_id,
            MappingKind::Triplet { .. } => None,
        }
    }

    pub fn fuel_type_id(&self) -> Option<ValueId> {
        match self.kind {
            MappingKind::Wildcard { .. } => None,
            MappingKind::Triplet { fuel_type_id, .. } => fuel_type_id,
        }
    }
}

/// Desired state of one pair as written by a save: the canonical pair, the
/// model-level VehicleType and per-model-year FuelTypes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairAssignment {
    pub pair: PairKey,
    pub canonical: PairKey,
    pub vehicle_type_id: Option<ValueId>,
    /// model year id -> fuel type id
    pub fuel_types: BTreeMap<ValueId, ValueId>,
}

impl PairAssignment {
    /// Assignment resolving a pair to itself, with nothing assigned yet.
    pub fn identity(pair: PairKey) -> Self {
        Self {
            pair,
            canonical: pair,
            vehicle_type_id: None,
            fuel_types: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vehicle_type_id.is_none() && self.fuel_types.is_empty()
    }

    /// Expand into rows. The Wildcard row is emitted when a VehicleType is
    /// set, or when nothing else is, so the canonical pair is still recorded.
    /// An absent VehicleType never produces a Wildcard that would overwrite
    /// an existing one.
    pub fn to_mappings(
        &self,
        coverage: Option<&UncuratedPair>,
        created_at: DateTime<Utc>,
    ) -> Vec<RegularizationMapping> {
        let (start, end) = match coverage {
            Some(c) => (Some(c.first_data_year), Some(c.last_data_year)),
            None => (None, None),
        };
        let mut rows = Vec::with_capacity(self.fuel_types.len() + 1);

        if self.vehicle_type_id.is_some() || self.fuel_types.is_empty() {
            rows.push(RegularizationMapping {
                pair: self.pair,
                canonical: self.canonical,
                kind: MappingKind::Wildcard {
                    vehicle_type_id: self.vehicle_type_id,
                },
                record_count: coverage.map(|c| c.record_count).unwrap_or(0),
                year_range_start: start,
                year_range_end: end,
                created_at,
            });
        }

        for (&model_year_id, &fuel_type_id) in &self.fuel_types {
            rows.push(RegularizationMapping {
                pair: self.pair,
                canonical: self.canonical,
                kind: MappingKind::Triplet {
                    model_year_id,
                    fuel_type_id: Some(fuel_type_id),
                },
                record_count: coverage
                    .and_then(|c| c.model_years.get(&model_year_id).copied())
                    .unwrap_or(0),
                year_range_start: start,
                year_range_end: end,
                created_at,
            });
        }

        rows
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Derived completion state of a pair. Ordered: Unassigned < Partial < Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Unassigned,
    Partial,
    Complete,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => write!(f, "unassigned"),
            Self::Partial => write!(f, "partial"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> PairKey {
        PairKey::new(ValueId(1), ValueId(10))
    }

    fn coverage() -> UncuratedPair {
        UncuratedPair {
            pair: pair(),
            record_count: 7,
            model_years: BTreeMap::from([(ValueId(2015), 4), (ValueId(2016), 3)]),
            first_data_year: 2011,
            last_data_year: 2014,
            in_trusted_years: false,
        }
    }

    #[test]
    fn assignment_with_only_fuel_types_emits_no_wildcard() {
        let mut a = PairAssignment::identity(pair());
        a.fuel_types.insert(ValueId(2015), ValueId(100));
        let rows = a.to_mappings(Some(&coverage()), Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind.model_year_id(), Some(ValueId(2015)));
        assert_eq!(rows[0].record_count, 4);
        assert_eq!(rows[0].year_range_start, Some(2011));
        assert_eq!(rows[0].year_range_end, Some(2014));
    }

    #[test]
    fn empty_assignment_still_records_canonical_pair() {
        let mut a = PairAssignment::identity(pair());
        a.canonical = PairKey::new(ValueId(2), ValueId(20));
        let rows = a.to_mappings(None, Utc::now());
        assert_eq!(rows.len(), 1);
        assert!(rows[0].kind.is_wildcard());
        assert_eq!(rows[0].vehicle_type_id(), None);
        assert_eq!(rows[0].canonical, PairKey::new(ValueId(2), ValueId(20)));
    }

    #[test]
    fn wildcard_and_triplets() {
        let mut a = PairAssignment::identity(pair());
        a.vehicle_type_id = Some(ValueId(300));
        a.fuel_types.insert(ValueId(2015), ValueId(100));
        a.fuel_types.insert(ValueId(2016), ValueId(101));
        let rows = a.to_mappings(Some(&coverage()), Utc::now());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].vehicle_type_id(), Some(ValueId(300)));
        assert_eq!(rows[0].record_count, 7);
        assert_eq!(rows[0].fuel_type_id(), None);
        assert_eq!(rows[2].fuel_type_id(), Some(ValueId(101)));
        assert_eq!(rows[2].vehicle_type_id(), None);
    }

    #[test]
    fn catalog_lookups() {
        let catalog = ValueCatalog::from_values([
            CanonicalValue {
                id: ValueId(1),
                kind: DimensionKind::FuelType,
                code: UNSPECIFIED_CODE.into(),
                description: "Unspecified".into(),
            },
            CanonicalValue {
                id: ValueId(2),
                kind: DimensionKind::FuelType,
                code: "E".into(),
                description: "Gasoline".into(),
            },
            CanonicalValue {
                id: ValueId(2015),
                kind: DimensionKind::ModelYear,
                code: "2015".into(),
                description: "2015".into(),
            },
        ]);
        assert_eq!(catalog.unspecified(DimensionKind::FuelType), Some(ValueId(1)));
        assert_eq!(catalog.unspecified(DimensionKind::VehicleType), None);
        assert!(catalog.get(DimensionKind::FuelType, ValueId(1)).unwrap().is_unspecified());
        assert_eq!(catalog.by_code(DimensionKind::FuelType, "E").unwrap().id, ValueId(2));
        assert!(catalog.require(DimensionKind::Make, ValueId(2)).is_err());
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn mapping_key_display() {
        let key = MappingKey { pair: pair(), model_year_id: None };
        assert_eq!(key.to_string(), "make 1 / model 10 / *");
    }
}
