//! `catreg import` - load canonical values and raw records from CSV.
//!
//! Records reference dimension values by code. Codes not yet in the store
//! are created on the fly; blank cells become NULL.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use catreg_regularize::source::RawRecordStore;
use catreg_regularize::{DimensionKind, ValueId};
use catreg_store::{Database, FactRecord};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::{print_json, CliError, Paths};

const BATCH_SIZE: usize = 5_000;

#[derive(Subcommand)]
pub enum ImportCommands {
    /// Load values of one dimension (columns: code[,description][,id])
    #[command(after_help = "\
Examples:
  catreg import values make makes.csv
  catreg import values fuel-type fuels.csv --delimiter ';'")]
    Values {
        /// Dimension the values belong to
        kind: ValueKind,

        /// CSV file with a header row
        file: PathBuf,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,

        /// Output JSON summary to stdout
        #[arg(long)]
        json: bool,
    },

    /// Load raw records (columns: data_year,make,model,model_year,fuel_type,vehicle_type)
    #[command(after_help = "\
Examples:
  catreg import records registrations-2012.csv
  catreg import records all.tsv --delimiter '\\t'")]
    Records {
        /// CSV file with a header row
        file: PathBuf,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,

        /// Output JSON summary to stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ValueKind {
    Make,
    Model,
    ModelYear,
    FuelType,
    VehicleType,
}

impl From<ValueKind> for DimensionKind {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Make => DimensionKind::Make,
            ValueKind::Model => DimensionKind::Model,
            ValueKind::ModelYear => DimensionKind::ModelYear,
            ValueKind::FuelType => DimensionKind::FuelType,
            ValueKind::VehicleType => DimensionKind::VehicleType,
        }
    }
}

pub fn cmd_import(paths: &Paths, cmd: ImportCommands) -> Result<(), CliError> {
    let db = paths.open_database()?;
    match cmd {
        ImportCommands::Values { kind, file, delimiter, json } => {
            let summary = import_values(&db, kind.into(), open(&file)?, delimiter_byte(delimiter)?)?;
            report(&summary, json, &file)
        }
        ImportCommands::Records { file, delimiter, json } => {
            let summary = import_records(&db, open(&file)?, delimiter_byte(delimiter)?)?;
            report(&summary, json, &file)
        }
    }
}

fn open(path: &Path) -> Result<File, CliError> {
    File::open(path).map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))
}

fn delimiter_byte(delimiter: char) -> Result<u8, CliError> {
    if delimiter == 't' || delimiter == '\t' {
        return Ok(b'\t');
    }
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| CliError::args(format!("delimiter must be a single ASCII character, got {delimiter:?}")))
}

fn reader<R: Read>(input: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(input)
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    /// Dimension values created because a code was new.
    pub values_created: usize,
}

fn report(summary: &ImportSummary, json: bool, file: &Path) -> Result<(), CliError> {
    if json {
        print_json(summary)?;
    }
    eprintln!(
        "imported {} rows from {} ({} new values)",
        summary.rows,
        file.display(),
        summary.values_created
    );
    Ok(())
}

// ============================================================================
// values
// ============================================================================

#[derive(Deserialize)]
struct ValueRow {
    code: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    id: Option<i64>,
}

pub fn import_values<R: Read>(
    db: &Database,
    kind: DimensionKind,
    input: R,
    delimiter: u8,
) -> Result<ImportSummary, CliError> {
    let catalog = db.value_catalog()?;
    // Codes written by this import; the catalog snapshot predates them.
    let mut written: HashSet<String> = HashSet::new();
    let mut summary = ImportSummary::default();

    for (line, row) in reader(input, delimiter).deserialize::<ValueRow>().enumerate() {
        let row = row.map_err(|e| CliError::parse(format!("row {}: {e}", line + 2)))?;
        if row.code.is_empty() {
            return Err(CliError::parse(format!("row {}: empty code", line + 2)));
        }
        let known = catalog.by_code(kind, &row.code).is_some() || written.contains(&row.code);
        let code = row.code;
        match (known, row.id, row.description) {
            // A bare code for a known value leaves its description alone.
            (true, _, None) => {}
            (false, Some(id), description) => {
                db.insert_value_with_id(kind, ValueId(id), &code, &description.unwrap_or_default())?
            }
            (_, _, description) => {
                db.upsert_value(kind, &code, &description.unwrap_or_default())?;
            }
        }
        if !known {
            summary.values_created += 1;
            written.insert(code);
        }
        summary.rows += 1;
    }
    log::info!("{kind}: {} values read, {} created", summary.rows, summary.values_created);
    Ok(summary)
}

// ============================================================================
// records
// ============================================================================

#[derive(Deserialize)]
struct RecordRow {
    data_year: i32,
    #[serde(default)]
    make: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    model_year: Option<String>,
    #[serde(default)]
    fuel_type: Option<String>,
    #[serde(default)]
    vehicle_type: Option<String>,
}

/// Code -> id lookups for one import, creating values for unseen codes.
struct CodeResolver<'a> {
    db: &'a Database,
    ids: HashMap<(DimensionKind, String), ValueId>,
    created: usize,
}

impl<'a> CodeResolver<'a> {
    fn new(db: &'a Database) -> Result<Self, CliError> {
        let catalog = db.value_catalog()?;
        let mut ids = HashMap::new();
        for kind in DimensionKind::ALL {
            for value in catalog.values(kind) {
                ids.insert((kind, value.code.clone()), value.id);
            }
        }
        Ok(Self { db, ids, created: 0 })
    }

    fn resolve(&mut self, kind: DimensionKind, code: Option<String>) -> Result<Option<ValueId>, CliError> {
        let Some(code) = code.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        if let Some(id) = self.ids.get(&(kind, code.clone())) {
            return Ok(Some(*id));
        }
        let id = self.db.upsert_value(kind, &code, "")?;
        log::debug!("created {kind} {code} as {id}");
        self.ids.insert((kind, code), id);
        self.created += 1;
        Ok(Some(id))
    }
}

pub fn import_records<R: Read>(db: &Database, input: R, delimiter: u8) -> Result<ImportSummary, CliError> {
    let mut resolver = CodeResolver::new(db)?;
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut rows = 0;

    for (line, row) in reader(input, delimiter).deserialize::<RecordRow>().enumerate() {
        let row = row.map_err(|e| CliError::parse(format!("row {}: {e}", line + 2)))?;
        batch.push(FactRecord {
            data_year: row.data_year,
            make_id: resolver.resolve(DimensionKind::Make, row.make)?,
            model_id: resolver.resolve(DimensionKind::Model, row.model)?,
            model_year_id: resolver.resolve(DimensionKind::ModelYear, row.model_year)?,
            fuel_type_id: resolver.resolve(DimensionKind::FuelType, row.fuel_type)?,
            vehicle_type_id: resolver.resolve(DimensionKind::VehicleType, row.vehicle_type)?,
        });
        if batch.len() == BATCH_SIZE {
            rows += db.insert_records(&batch)?;
            batch.clear();
        }
    }
    rows += db.insert_records(&batch)?;

    log::info!("{rows} records imported, {} values created", resolver.created);
    Ok(ImportSummary { rows, values_created: resolver.created })
}
