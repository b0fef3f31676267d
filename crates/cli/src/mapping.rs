//! `catreg mapping` - inspect and edit the mapping rows of one raw pair.

use std::collections::BTreeMap;

use catreg_regularize::{
    CompletionStatus, DimensionKind, MappingKey, MappingKind, PairAssignment, PairKey,
    RegularizationMapping, ValueCatalog, ValueId,
};
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;

use crate::{code_of, print_json, resolve_code, CliError, Paths, Workspace};

#[derive(Subcommand)]
pub enum MappingCommands {
    /// Show a pair's rows, raw model years and completion status
    Show {
        /// Raw make code
        make: String,
        /// Raw model code
        model: String,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Save an assignment (last write wins per row)
    #[command(after_help = "\
Examples:
  catreg mapping assign ACME X1X --canonical-model X1 --vehicle-type PAU
  catreg mapping assign ACME X1X --fuel 2012=E --fuel 2013=UNSPECIFIED")]
    Assign {
        /// Raw make code
        make: String,
        /// Raw model code
        model: String,

        /// Canonical make code (defaults to the pair's current one, else the raw make)
        #[arg(long)]
        canonical_make: Option<String>,

        /// Canonical model code (defaults to the pair's current one, else the raw model)
        #[arg(long)]
        canonical_model: Option<String>,

        /// Model-level vehicle type code
        #[arg(long)]
        vehicle_type: Option<String>,

        /// Fuel type for one model year (repeatable)
        #[arg(long, value_name = "YEAR=CODE")]
        fuel: Vec<String>,

        /// Output the written rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Insert one row; fails if a row with the same key exists
    #[command(after_help = "\
Examples:
  catreg mapping add ACME X1X --vehicle-type CAM
  catreg mapping add ACME X1X --year 2014 --fuel L")]
    Add {
        /// Raw make code
        make: String,
        /// Raw model code
        model: String,

        /// Model year code; omit for the model-level row
        #[arg(long)]
        year: Option<String>,

        /// Vehicle type code (model-level row only)
        #[arg(long, conflicts_with = "year")]
        vehicle_type: Option<String>,

        /// Fuel type code (model-year row only)
        #[arg(long, requires = "year")]
        fuel: Option<String>,

        /// Canonical make code
        #[arg(long)]
        canonical_make: Option<String>,

        /// Canonical model code
        #[arg(long)]
        canonical_model: Option<String>,
    },

    /// Remove one row (the model-level row unless --year is given)
    Remove {
        /// Raw make code
        make: String,
        /// Raw model code
        model: String,

        /// Model year code
        #[arg(long)]
        year: Option<String>,
    },

    /// Remove every row of a pair
    Clear {
        /// Raw make code
        make: String,
        /// Raw model code
        model: String,
    },
}

pub fn cmd_mapping(paths: &Paths, cmd: MappingCommands) -> Result<(), CliError> {
    let ws = paths.open_session()?;
    let catalog = ws.session.catalog()?;

    match cmd {
        MappingCommands::Show { make, model, json } => {
            let pair = resolve_pair(&catalog, &make, &model)?;
            cmd_show(&ws, &catalog, pair, json)
        }
        MappingCommands::Assign { make, model, canonical_make, canonical_model, vehicle_type, fuel, json } => {
            let pair = resolve_pair(&catalog, &make, &model)?;
            let canonical = canonical_pair(&ws, &catalog, pair, canonical_make, canonical_model)?;
            let assignment = PairAssignment {
                pair,
                canonical,
                vehicle_type_id: vehicle_type
                    .map(|code| resolve_code(&catalog, DimensionKind::VehicleType, &code))
                    .transpose()?,
                fuel_types: parse_fuel_args(&catalog, &fuel)?,
            };
            let rows = ws.session.save_assignment(&assignment)?;
            if json {
                print_json(&rows)?;
            }
            eprintln!("{make} {model}: saved {} rows, now {}", rows.len(), ws.session.status_of(pair)?);
            Ok(())
        }
        MappingCommands::Add { make, model, year, vehicle_type, fuel, canonical_make, canonical_model } => {
            let pair = resolve_pair(&catalog, &make, &model)?;
            let canonical = canonical_pair(&ws, &catalog, pair, canonical_make, canonical_model)?;
            let kind = match year {
                Some(year) => MappingKind::Triplet {
                    model_year_id: resolve_code(&catalog, DimensionKind::ModelYear, &year)?,
                    fuel_type_id: fuel
                        .map(|code| resolve_code(&catalog, DimensionKind::FuelType, &code))
                        .transpose()?,
                },
                None => MappingKind::Wildcard {
                    vehicle_type_id: vehicle_type
                        .map(|code| resolve_code(&catalog, DimensionKind::VehicleType, &code))
                        .transpose()?,
                },
            };
            let coverage = ws.session.untrusted_pairs()?.iter().find(|p| p.pair == pair).cloned();
            let row = RegularizationMapping {
                pair,
                canonical,
                kind,
                record_count: match (&coverage, kind.model_year_id()) {
                    (Some(c), Some(y)) => c.model_years.get(&y).copied().unwrap_or(0),
                    (Some(c), None) => c.record_count,
                    (None, _) => 0,
                },
                year_range_start: coverage.as_ref().map(|c| c.first_data_year),
                year_range_end: coverage.as_ref().map(|c| c.last_data_year),
                created_at: Utc::now(),
            };
            ws.session.add_mapping(&row)?;
            eprintln!("{make} {model}: added {}", row.key());
            Ok(())
        }
        MappingCommands::Remove { make, model, year } => {
            let pair = resolve_pair(&catalog, &make, &model)?;
            let key = MappingKey {
                pair,
                model_year_id: year
                    .map(|code| resolve_code(&catalog, DimensionKind::ModelYear, &code))
                    .transpose()?,
            };
            if ws.session.remove_mapping(&key)? {
                eprintln!("{make} {model}: removed {key}");
                Ok(())
            } else {
                Err(CliError::regularize(catreg_regularize::RegularizeError::NotFound(format!(
                    "no mapping {key}"
                ))))
            }
        }
        MappingCommands::Clear { make, model } => {
            let pair = resolve_pair(&catalog, &make, &model)?;
            let removed = ws.session.clear_pair(pair)?;
            eprintln!("{make} {model}: removed {removed} rows");
            Ok(())
        }
    }
}

fn resolve_pair(catalog: &ValueCatalog, make: &str, model: &str) -> Result<PairKey, CliError> {
    Ok(PairKey::new(
        resolve_code(catalog, DimensionKind::Make, make)?,
        resolve_code(catalog, DimensionKind::Model, model)?,
    ))
}

/// Explicit codes win; otherwise keep the canonical pair the raw pair
/// already resolves to, else resolve it to itself.
fn canonical_pair(
    ws: &Workspace,
    catalog: &ValueCatalog,
    pair: PairKey,
    make: Option<String>,
    model: Option<String>,
) -> Result<PairKey, CliError> {
    let current = ws
        .session
        .mappings_for_pair(pair)?
        .first()
        .map(|row| row.canonical)
        .unwrap_or(pair);
    Ok(PairKey::new(
        match make {
            Some(code) => resolve_code(catalog, DimensionKind::Make, &code)?,
            None => current.make_id,
        },
        match model {
            Some(code) => resolve_code(catalog, DimensionKind::Model, &code)?,
            None => current.model_id,
        },
    ))
}

/// Parse repeated `YEAR=CODE` arguments. A later entry for the same year
/// replaces an earlier one.
fn parse_fuel_args(catalog: &ValueCatalog, args: &[String]) -> Result<BTreeMap<ValueId, ValueId>, CliError> {
    let mut fuel_types = BTreeMap::new();
    for arg in args {
        let (year, code) = arg.split_once('=').ok_or_else(|| {
            CliError::args(format!("invalid --fuel {arg:?}")).with_hint("expected YEAR=CODE, e.g. --fuel 2012=E")
        })?;
        fuel_types.insert(
            resolve_code(catalog, DimensionKind::ModelYear, year.trim())?,
            resolve_code(catalog, DimensionKind::FuelType, code.trim())?,
        );
    }
    Ok(fuel_types)
}

// ============================================================================
// show
// ============================================================================

#[derive(Serialize)]
struct PairDetail {
    pair: PairKey,
    status: CompletionStatus,
    raw_model_years: Vec<String>,
    rows: Vec<RegularizationMapping>,
    /// Vehicle type codes accepted for the pair's canonical model.
    selectable_vehicle_types: Vec<String>,
    /// What `catreg automap` would assign; nothing is written.
    suggestion: Option<PairAssignment>,
}

fn describe_suggestion(catalog: &ValueCatalog, suggestion: &PairAssignment) -> String {
    let fuels: Vec<String> = suggestion
        .fuel_types
        .iter()
        .map(|(year, fuel)| {
            format!(
                "{}={}",
                code_of(catalog, DimensionKind::ModelYear, *year),
                code_of(catalog, DimensionKind::FuelType, *fuel)
            )
        })
        .collect();
    format!(
        "suggested: -> {} {}, vehicle type {}, fuel [{}]",
        code_of(catalog, DimensionKind::Make, suggestion.canonical.make_id),
        code_of(catalog, DimensionKind::Model, suggestion.canonical.model_id),
        suggestion
            .vehicle_type_id
            .map_or_else(|| "-".to_string(), |id| code_of(catalog, DimensionKind::VehicleType, id)),
        fuels.join(", ")
    )
}

fn describe_row(catalog: &ValueCatalog, row: &RegularizationMapping) -> String {
    let canonical = format!(
        "-> {} {}",
        code_of(catalog, DimensionKind::Make, row.canonical.make_id),
        code_of(catalog, DimensionKind::Model, row.canonical.model_id)
    );
    let optional = |kind: DimensionKind, id: Option<ValueId>| match id {
        Some(id) => code_of(catalog, kind, id),
        None => "-".to_string(),
    };
    match row.kind {
        MappingKind::Wildcard { vehicle_type_id } => format!(
            "*     vehicle type {:<12} {canonical}",
            optional(DimensionKind::VehicleType, vehicle_type_id)
        ),
        MappingKind::Triplet { model_year_id, fuel_type_id } => format!(
            "{:<5} fuel type    {:<12} {canonical}",
            code_of(catalog, DimensionKind::ModelYear, model_year_id),
            optional(DimensionKind::FuelType, fuel_type_id)
        ),
    }
}

fn cmd_show(ws: &Workspace, catalog: &ValueCatalog, pair: PairKey, json: bool) -> Result<(), CliError> {
    let rows = ws.session.mappings_for_pair(pair)?;
    let canonical = rows.first().map_or(pair, |row| row.canonical);
    let detail = PairDetail {
        pair,
        status: ws.session.status_of(pair)?,
        raw_model_years: ws
            .session
            .model_years_for_pair(pair)?
            .into_iter()
            .map(|year| code_of(catalog, DimensionKind::ModelYear, year))
            .collect(),
        rows,
        selectable_vehicle_types: ws
            .session
            .selectable_vehicle_types(canonical)?
            .into_iter()
            .map(|value| value.code)
            .collect(),
        suggestion: ws.session.suggest_assignment(pair)?,
    };

    if json {
        return print_json(&detail);
    }

    for row in &detail.rows {
        println!("{}", describe_row(catalog, row));
    }
    eprintln!(
        "{} rows, status {}, raw model years [{}]",
        detail.rows.len(),
        detail.status,
        detail.raw_model_years.join(", ")
    );
    eprintln!("vehicle types: {}", detail.selectable_vehicle_types.join(", "));
    if let Some(suggestion) = &detail.suggestion {
        eprintln!("{}", describe_suggestion(catalog, suggestion));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catreg_regularize::CanonicalValue;

    fn catalog() -> ValueCatalog {
        let value = |kind, id, code: &str| CanonicalValue {
            id: ValueId(id),
            kind,
            code: code.to_string(),
            description: String::new(),
        };
        ValueCatalog::from_values([
            value(DimensionKind::ModelYear, 2012, "2012"),
            value(DimensionKind::ModelYear, 2013, "2013"),
            value(DimensionKind::FuelType, 100, "E"),
            value(DimensionKind::FuelType, 101, "L"),
        ])
    }

    #[test]
    fn fuel_args_resolve_codes() {
        let args = vec!["2012=E".to_string(), "2013 = L".to_string(), "2012=L".to_string()];
        let parsed = parse_fuel_args(&catalog(), &args).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&ValueId(2012)], ValueId(101));
        assert_eq!(parsed[&ValueId(2013)], ValueId(101));
    }

    #[test]
    fn fuel_arg_without_equals_is_usage_error() {
        let err = parse_fuel_args(&catalog(), &["2012".to_string()]).unwrap_err();
        assert_eq!(err.code, crate::exit_codes::EXIT_USAGE);
        assert!(err.hint.is_some());
    }

    #[test]
    fn triplet_row_description() {
        let row = RegularizationMapping {
            pair: PairKey::new(ValueId(1), ValueId(11)),
            canonical: PairKey::new(ValueId(1), ValueId(10)),
            kind: MappingKind::Triplet {
                model_year_id: ValueId(2012),
                fuel_type_id: Some(ValueId(100)),
            },
            record_count: 3,
            year_range_start: None,
            year_range_end: None,
            created_at: Utc::now(),
        };
        let text = describe_row(&catalog(), &row);
        assert!(text.starts_with("2012"), "{text}");
        assert!(text.contains(" E "), "{text}");
        assert!(text.ends_with("-> #1 #10"), "{text}");
    }

    #[test]
    fn suggestion_description_uses_codes() {
        let suggestion = PairAssignment {
            vehicle_type_id: None,
            fuel_types: BTreeMap::from([(ValueId(2012), ValueId(100)), (ValueId(2013), ValueId(101))]),
            ..PairAssignment::identity(PairKey::new(ValueId(1), ValueId(10)))
        };
        let text = describe_suggestion(&catalog(), &suggestion);
        assert_eq!(text, "suggested: -> #1 #10, vehicle type -, fuel [2012=E, 2013=L]");
    }
}
