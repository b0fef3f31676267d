//! End-to-end tests: SQLite store + regularization session.

use std::collections::BTreeMap;
use std::sync::Arc;

use catreg_regularize::expand::{FilterSelection, QueryExpander};
use catreg_regularize::source::{MappingStore, RawRecordStore};
use catreg_regularize::status::StatusBoard;
use catreg_regularize::{
    CompletionStatus, DimensionKind, MappingKey, MappingKind, PairAssignment, PairKey, PairScope,
    RegularizationMapping, RegularizationSession, RegularizeConfig, RegularizeError, ValueId,
};
use catreg_store::{Database, FactRecord};
use chrono::Utc;

const ACME: ValueId = ValueId(1);
const OTHER: ValueId = ValueId(2);
const X1: ValueId = ValueId(10);
const X2: ValueId = ValueId(11);
const GAS: ValueId = ValueId(100);
const ELEC: ValueId = ValueId(101);
const CAR: ValueId = ValueId(200);
const TRUCK: ValueId = ValueId(201);

fn acme_x1() -> PairKey {
    PairKey::new(ACME, X1)
}

fn rec(
    data_year: i32,
    make: ValueId,
    model: ValueId,
    model_year: i64,
    fuel: Option<ValueId>,
    vehicle: Option<ValueId>,
) -> FactRecord {
    FactRecord {
        data_year,
        make_id: Some(make),
        model_id: Some(model),
        model_year_id: Some(ValueId(model_year)),
        fuel_type_id: fuel,
        vehicle_type_id: vehicle,
    }
}

fn seed_values(db: &Database) {
    db.insert_value_with_id(DimensionKind::Make, ACME, "ACME", "Acme").unwrap();
    db.insert_value_with_id(DimensionKind::Make, OTHER, "OTHER", "Other").unwrap();
    db.insert_value_with_id(DimensionKind::Model, X1, "X1", "X1").unwrap();
    db.insert_value_with_id(DimensionKind::Model, X2, "X2", "X2").unwrap();
    db.insert_value_with_id(DimensionKind::FuelType, GAS, "E", "Gasoline").unwrap();
    db.insert_value_with_id(DimensionKind::FuelType, ELEC, "L", "Electric").unwrap();
    db.insert_value_with_id(DimensionKind::VehicleType, CAR, "PAU", "Passenger car").unwrap();
    db.insert_value_with_id(DimensionKind::VehicleType, TRUCK, "CAM", "Truck").unwrap();
    for year in 2008..=2022 {
        db.insert_value_with_id(DimensionKind::ModelYear, ValueId(year), &year.to_string(), "")
            .unwrap();
    }
}

/// Record ids follow insertion order:
///  1-3   trusted ACME X1 2015 Gasoline car
///  4-5   trusted ACME X1 2018 Electric car
///  6-7   untrusted ACME X1 2015
///  8     untrusted ACME X1 2016
///  9     untrusted ACME X1 2018
///  10    untrusted ACME X1 2020
///  11    untrusted OTHER X1 2015
///  12    untrusted ACME X2 2015
fn seed_scenario(db: &Database) {
    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(rec(2018, ACME, X1, 2015, Some(GAS), Some(CAR)));
    }
    for _ in 0..2 {
        records.push(rec(2017, ACME, X1, 2018, Some(ELEC), Some(CAR)));
    }
    records.push(rec(2012, ACME, X1, 2015, None, None));
    records.push(rec(2013, ACME, X1, 2015, None, None));
    records.push(rec(2012, ACME, X1, 2016, None, None));
    records.push(rec(2014, ACME, X1, 2018, None, None));
    records.push(rec(2014, ACME, X1, 2020, None, None));
    records.push(rec(2012, OTHER, X1, 2015, None, None));
    records.push(rec(2012, ACME, X2, 2015, None, None));
    db.insert_records(&records).unwrap();
}

fn setup_with(config: RegularizeConfig) -> (Arc<Database>, RegularizationSession) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.set_trusted_years(&config.trusted_years).unwrap();
    seed_values(&db);
    seed_scenario(&db);
    let session = RegularizationSession::new(db.clone(), db.clone(), config).unwrap();
    (db, session)
}

fn setup() -> (Arc<Database>, RegularizationSession) {
    setup_with(RegularizeConfig::new([2017, 2018]))
}

fn select(makes: &[ValueId], models: &[ValueId], fuels: &[ValueId], vehicles: &[ValueId]) -> FilterSelection {
    FilterSelection {
        makes: makes.iter().copied().collect(),
        models: models.iter().copied().collect(),
        fuel_types: fuels.iter().copied().collect(),
        vehicle_types: vehicles.iter().copied().collect(),
        regularization_enabled: true,
    }
}

fn matching(db: &Database, session: &RegularizationSession, selection: &FilterSelection) -> Vec<i64> {
    let predicate = session.filter_predicate(selection).unwrap();
    db.matching_record_ids(&predicate, None).unwrap()
}

fn unspecified_fuel(session: &RegularizationSession) -> ValueId {
    session
        .catalog()
        .unwrap()
        .unspecified(DimensionKind::FuelType)
        .unwrap()
}

// ===========================================================================
// Scenario A: auto-map, then a human completes the pair
// ===========================================================================

#[test]
fn scenario_a_auto_map_then_manual_completion() {
    let (_db, session) = setup();

    let report = session.run_auto_map().unwrap();
    assert_eq!(report.pairs_examined, 3);
    assert_eq!(report.pairs_matched, 1);
    assert_eq!(report.pairs_inserted, 1);
    assert_eq!(report.rows_inserted, 3);

    let rows = session.mappings_for_pair(acme_x1()).unwrap();
    let kinds: Vec<MappingKind> = rows.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MappingKind::Wildcard { vehicle_type_id: Some(CAR) },
            MappingKind::Triplet { model_year_id: ValueId(2015), fuel_type_id: Some(GAS) },
            MappingKind::Triplet { model_year_id: ValueId(2018), fuel_type_id: Some(ELEC) },
        ]
    );
    assert_eq!(session.status_of(acme_x1()).unwrap(), CompletionStatus::Partial);

    let unspecified = unspecified_fuel(&session);
    let assignment = PairAssignment {
        vehicle_type_id: Some(CAR),
        fuel_types: BTreeMap::from([(ValueId(2016), unspecified), (ValueId(2020), unspecified)]),
        ..PairAssignment::identity(acme_x1())
    };
    session.save_assignment(&assignment).unwrap();

    assert_eq!(session.status_of(acme_x1()).unwrap(), CompletionStatus::Complete);
    // earlier Triplets are untouched by the save
    let rows = session.mappings_for_pair(acme_x1()).unwrap();
    assert_eq!(rows.len(), 5);
}

#[test]
fn untrusted_only_pairs_and_unknown_codes_get_nothing() {
    let (_db, session) = setup();
    session.run_auto_map().unwrap();
    assert!(session.mappings_for_pair(PairKey::new(OTHER, X1)).unwrap().is_empty());
    assert!(session.mappings_for_pair(PairKey::new(ACME, X2)).unwrap().is_empty());
    assert_eq!(
        session.status_of(PairKey::new(ACME, X2)).unwrap(),
        CompletionStatus::Unassigned
    );
}

// ===========================================================================
// Scenario B and the filter invariants
// ===========================================================================

#[test]
fn scenario_b_make_model_fuel_selects_2015_rows_only() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();

    let ids = matching(&db, &session, &select(&[ACME], &[X1], &[GAS], &[]));
    // trusted Gasoline rows directly, untrusted rows only for model year 2015
    assert_eq!(ids, vec![1, 2, 3, 6, 7]);

    let mut direct = select(&[ACME], &[X1], &[GAS], &[]);
    direct.regularization_enabled = false;
    assert_eq!(matching(&db, &session, &direct), vec![1, 2, 3]);
}

#[test]
fn make_and_model_match_intersection() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();

    let makes = matching(&db, &session, &select(&[ACME], &[], &[], &[]));
    let models = matching(&db, &session, &select(&[], &[X1], &[], &[]));
    let both = matching(&db, &session, &select(&[ACME], &[X1], &[], &[]));

    let intersection: Vec<i64> = makes.iter().copied().filter(|id| models.contains(id)).collect();
    assert_eq!(both, intersection);
    assert_eq!(both, (1..=10).collect::<Vec<_>>());
    assert!(!both.contains(&11), "X1 from another make");
    assert!(!both.contains(&12), "another ACME model");
}

#[test]
fn fuel_path_never_crosses_model_years() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();

    assert_eq!(matching(&db, &session, &select(&[], &[], &[GAS], &[])), vec![1, 2, 3, 6, 7]);
    assert_eq!(matching(&db, &session, &select(&[], &[], &[ELEC], &[])), vec![4, 5, 9]);
}

#[test]
fn vehicle_type_path_is_year_independent() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();
    assert_eq!(
        matching(&db, &session, &select(&[], &[], &[], &[CAR])),
        (1..=10).collect::<Vec<_>>()
    );
    assert!(matching(&db, &session, &select(&[], &[], &[], &[TRUCK])).is_empty());
}

#[test]
fn remapped_pair_filters_under_canonical_pair() {
    let (db, session) = setup();
    // OTHER X1 is a mislabelled ACME X1
    let assignment = PairAssignment {
        canonical: acme_x1(),
        ..PairAssignment::identity(PairKey::new(OTHER, X1))
    };
    session.save_assignment(&assignment).unwrap();

    let acme = matching(&db, &session, &select(&[ACME], &[], &[], &[]));
    assert!(acme.contains(&11));
    // The raw make no longer reaches the mapped record.
    let other = matching(&db, &session, &select(&[OTHER], &[], &[], &[]));
    assert!(other.is_empty());
    let raw_pair = matching(&db, &session, &select(&[OTHER], &[X1], &[], &[]));
    assert!(raw_pair.is_empty());
}

#[test]
fn expanded_sql_counts_agree_with_ids() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();
    let predicate = QueryExpander::expand_sql(&select(&[ACME], &[X1], &[], &[CAR]));
    assert_eq!(db.count_matching(&predicate).unwrap(), 10);
    assert_eq!(db.matching_record_ids(&predicate, Some(2)).unwrap(), vec![1, 2]);
}

#[test]
fn unknown_selected_value_is_not_found() {
    let (_db, session) = setup();
    let err = session
        .filter_predicate(&select(&[ValueId(404)], &[], &[], &[]))
        .unwrap_err();
    assert!(matches!(err, RegularizeError::NotFound(_)));
}

// ===========================================================================
// Pair index
// ===========================================================================

#[test]
fn uncurated_listing_survives_null_trusted_values() {
    let (db, session) = setup();
    db.insert_records(&[FactRecord {
        make_id: Some(ACME),
        ..FactRecord::new(2018)
    }])
    .unwrap();

    let pairs = session.uncurated_pairs().unwrap();
    let keys: Vec<PairKey> = pairs.iter().map(|p| p.pair).collect();
    assert_eq!(keys, vec![PairKey::new(ACME, X2), PairKey::new(OTHER, X1)]);
}

#[test]
fn model_years_come_from_untrusted_data() {
    let (_db, session) = setup();
    let years = session.model_years_for_pair(acme_x1()).unwrap();
    assert_eq!(
        years,
        vec![ValueId(2015), ValueId(2016), ValueId(2018), ValueId(2020)]
    );
}

#[test]
fn upstream_change_invalidates_listing() {
    let (db, session) = setup();
    assert_eq!(session.untrusted_pairs().unwrap().len(), 3);
    db.insert_records(&[rec(2013, OTHER, X2, 2012, None, None)]).unwrap();
    assert_eq!(session.untrusted_pairs().unwrap().len(), 4);
}

// ===========================================================================
// Auto-map contract
// ===========================================================================

#[test]
fn auto_map_is_idempotent() {
    let (db, session) = setup();
    session.run_auto_map().unwrap();
    let first = db.all_mappings().unwrap();

    let report = session.run_auto_map().unwrap();
    assert_eq!(report.pairs_inserted, 0);
    assert_eq!(report.pairs_skipped_existing, 1);
    assert_eq!(db.all_mappings().unwrap(), first);
}

#[test]
fn auto_map_leaves_touched_pairs_alone() {
    let (db, session) = setup();
    let manual = PairAssignment {
        vehicle_type_id: Some(TRUCK),
        ..PairAssignment::identity(acme_x1())
    };
    session.save_assignment(&manual).unwrap();
    let before = db.all_mappings().unwrap();

    let report = session.run_auto_map().unwrap();
    assert_eq!(report.rows_inserted, 0);
    assert_eq!(db.all_mappings().unwrap(), before);
}

#[test]
fn commit_skips_pairs_saved_after_proposal() {
    let (db, _session) = setup();
    let proposal = PairAssignment {
        vehicle_type_id: Some(CAR),
        ..PairAssignment::identity(acme_x1())
    }
    .to_mappings(None, Utc::now());

    // editor wins the race
    let edit = PairAssignment {
        vehicle_type_id: Some(TRUCK),
        ..PairAssignment::identity(acme_x1())
    }
    .to_mappings(None, Utc::now());
    db.save_mappings(&edit).unwrap();

    let outcome = db.insert_unmapped(&[proposal]).unwrap();
    assert_eq!(outcome.pairs_skipped, 1);
    assert_eq!(outcome.rows_inserted, 0);
    let rows = db.mappings_for_pair(acme_x1()).unwrap();
    assert_eq!(rows[0].vehicle_type_id(), Some(TRUCK));
}

#[test]
fn background_auto_map_and_sweep() {
    let (_db, session) = setup();
    assert!(matches!(*session.statuses(), StatusBoard::AllUnassigned));

    let report = session.spawn_auto_map().unwrap().join().unwrap().unwrap();
    assert_eq!(report.pairs_inserted, 1);

    let summary = session.spawn_status_sweep().unwrap().join().unwrap().unwrap();
    assert_eq!(summary.partial, 1);
    assert_eq!(summary.unassigned, 2);
    assert_eq!(session.statuses().status(acme_x1()), CompletionStatus::Partial);

    let overview = session.pair_overview(PairScope::Untrusted).unwrap();
    let acme = overview.iter().find(|p| p.pair.pair == acme_x1()).unwrap();
    assert_eq!(acme.status, CompletionStatus::Partial);
    assert_eq!(acme.make_code.as_deref(), Some("ACME"));
}

#[test]
fn empty_mapping_set_uses_fast_path() {
    let (_db, session) = setup();
    let overview = session.pair_overview(PairScope::Untrusted).unwrap();
    assert_eq!(overview.len(), 3);
    assert!(overview.iter().all(|p| p.status == CompletionStatus::Unassigned));
}

#[test]
fn assign_unspecified_policy_resolves_null_fuel_years() {
    let mut config = RegularizeConfig::new([2017, 2018]);
    config.auto_map.null_fuel_policy = catreg_regularize::config::NullFuelPolicy::AssignUnspecified;
    let (db, session) = setup_with(config);
    db.insert_records(&[
        rec(2018, ACME, X1, 2009, None, Some(CAR)),
        rec(2014, ACME, X1, 2009, None, None),
    ])
    .unwrap();

    session.run_auto_map().unwrap();
    let unspecified = unspecified_fuel(&session);
    let rows = session.mappings_for_pair(acme_x1()).unwrap();
    assert!(rows.iter().any(|r| r.kind
        == MappingKind::Triplet { model_year_id: ValueId(2009), fuel_type_id: Some(unspecified) }));
}

// ===========================================================================
// Manual edits
// ===========================================================================

#[test]
fn strict_mode_rejects_fuel_outside_canonical_options() {
    let (_db, session) = setup();
    let bad = PairAssignment {
        fuel_types: BTreeMap::from([(ValueId(2015), ELEC)]),
        ..PairAssignment::identity(acme_x1())
    };
    let err = session.save_assignment(&bad).unwrap_err();
    assert!(matches!(err, RegularizeError::Validation(_)));
    assert!(session.mappings_for_pair(acme_x1()).unwrap().is_empty());

    // no canonical reference for 2016: accepted
    let ok = PairAssignment {
        fuel_types: BTreeMap::from([(ValueId(2016), ELEC)]),
        ..PairAssignment::identity(acme_x1())
    };
    session.save_assignment(&ok).unwrap();
}

#[test]
fn lenient_mode_accepts_any_existing_fuel() {
    let mut config = RegularizeConfig::new([2017, 2018]);
    config.validation.strict_fuel_types = false;
    let (_db, session) = setup_with(config);
    let assignment = PairAssignment {
        fuel_types: BTreeMap::from([(ValueId(2015), ELEC)]),
        ..PairAssignment::identity(acme_x1())
    };
    session.save_assignment(&assignment).unwrap();
}

#[test]
fn vanished_pair_and_values_are_not_found() {
    let (_db, session) = setup();
    let missing_pair = PairAssignment::identity(PairKey::new(OTHER, X2));
    assert!(matches!(
        session.save_assignment(&missing_pair).unwrap_err(),
        RegularizeError::NotFound(_)
    ));

    let missing_value = PairAssignment {
        vehicle_type_id: Some(ValueId(999)),
        ..PairAssignment::identity(acme_x1())
    };
    assert!(matches!(
        session.save_assignment(&missing_value).unwrap_err(),
        RegularizeError::NotFound(_)
    ));
}

#[test]
fn save_is_last_write_wins_per_key() {
    let (_db, session) = setup();
    for vehicle_type in [CAR, TRUCK] {
        session
            .save_assignment(&PairAssignment {
                vehicle_type_id: Some(vehicle_type),
                ..PairAssignment::identity(acme_x1())
            })
            .unwrap();
    }
    let rows = session.mappings_for_pair(acme_x1()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].vehicle_type_id(), Some(TRUCK));
}

#[test]
fn failed_save_writes_nothing() {
    let (db, _session) = setup();
    let mut rows = PairAssignment {
        vehicle_type_id: Some(CAR),
        ..PairAssignment::identity(acme_x1())
    }
    .to_mappings(None, Utc::now());
    rows.push(RegularizationMapping {
        kind: MappingKind::Triplet { model_year_id: ValueId(2015), fuel_type_id: Some(ValueId(999)) },
        ..rows[0].clone()
    });

    // The fuel type does not exist: the whole save is rolled back.
    assert!(matches!(db.save_mappings(&rows).unwrap_err(), RegularizeError::NotFound(_)));
    assert!(!db.has_mappings().unwrap());
}

#[test]
fn strict_insert_rejects_duplicates() {
    let (_db, session) = setup();
    let row = RegularizationMapping {
        pair: acme_x1(),
        canonical: acme_x1(),
        kind: MappingKind::Triplet { model_year_id: ValueId(2015), fuel_type_id: Some(GAS) },
        record_count: 2,
        year_range_start: None,
        year_range_end: None,
        created_at: Utc::now(),
    };
    session.add_mapping(&row).unwrap();
    assert!(matches!(session.add_mapping(&row).unwrap_err(), RegularizeError::Validation(_)));

    let repointed = RegularizationMapping {
        canonical: PairKey::new(OTHER, X1),
        kind: MappingKind::Wildcard { vehicle_type_id: None },
        ..row
    };
    assert!(matches!(
        session.add_mapping(&repointed).unwrap_err(),
        RegularizeError::Validation(_)
    ));
}

#[test]
fn remove_and_clear() {
    let (_db, session) = setup();
    session.run_auto_map().unwrap();

    let wildcard = MappingKey { pair: acme_x1(), model_year_id: None };
    assert!(session.remove_mapping(&wildcard).unwrap());
    assert!(!session.remove_mapping(&wildcard).unwrap());
    assert_eq!(session.status_of(acme_x1()).unwrap(), CompletionStatus::Partial);

    assert_eq!(session.clear_pair(acme_x1()).unwrap(), 2);
    assert_eq!(session.status_of(acme_x1()).unwrap(), CompletionStatus::Unassigned);
}

// ===========================================================================
// On-disk store
// ===========================================================================

#[test]
fn mappings_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");

    {
        let db = Arc::new(Database::open(&path).unwrap());
        let config = RegularizeConfig::new([2017, 2018]);
        db.set_trusted_years(&config.trusted_years).unwrap();
        seed_values(&db);
        seed_scenario(&db);
        let session = RegularizationSession::new(db.clone(), db.clone(), config).unwrap();
        session.run_auto_map().unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.mapping_count().unwrap(), 3);
    assert_eq!(db.record_count().unwrap(), 12);
    let rows = db.mappings_for_pair(acme_x1()).unwrap();
    assert_eq!(rows[0].year_range_start, Some(2012));
    assert_eq!(rows[0].year_range_end, Some(2014));
    assert!(db.data_version().unwrap() > 0);
}

#[test]
fn uncurated_scope_skips_pairs_seen_in_trusted_years() {
    let (_db, session) = setup();
    let mut pairs: Vec<PairKey> = session
        .pair_overview(PairScope::UncuratedOnly)
        .unwrap()
        .iter()
        .map(|row| row.pair.pair)
        .collect();
    pairs.sort();
    assert_eq!(pairs, vec![PairKey::new(ACME, X2), PairKey::new(OTHER, X1)]);
}

#[test]
fn suggestion_matches_auto_map_without_writing() {
    let (db, session) = setup();
    let suggestion = session.suggest_assignment(acme_x1()).unwrap().unwrap();
    assert_eq!(suggestion.canonical, acme_x1());
    assert_eq!(suggestion.vehicle_type_id, Some(CAR));
    assert_eq!(
        suggestion.fuel_types,
        BTreeMap::from([(ValueId(2015), GAS), (ValueId(2018), ELEC)])
    );
    assert!(!db.has_mappings().unwrap());

    assert_eq!(session.suggest_assignment(PairKey::new(ACME, X2)).unwrap(), None);
}

#[test]
fn selectable_vehicle_types_include_placeholder() {
    let (_db, session) = setup();
    let codes: Vec<String> = session
        .selectable_vehicle_types(acme_x1())
        .unwrap()
        .into_iter()
        .map(|v| v.code)
        .collect();
    assert_eq!(codes, vec!["PAU".to_string(), catreg_regularize::model::UNSPECIFIED_CODE.to_string()]);

    // No trusted history: only the placeholder.
    assert_eq!(session.selectable_vehicle_types(PairKey::new(ACME, X2)).unwrap().len(), 1);
}
