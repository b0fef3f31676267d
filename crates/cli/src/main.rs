// catreg - categorical regularization over a vehicle record store

mod exit_codes;
mod import;
mod mapping;

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use catreg_regularize::expand::FilterSelection;
use catreg_regularize::hierarchy::ModelNode;
use catreg_regularize::session::PairOverview;
use catreg_regularize::{
    CompletionStatus, DimensionKind, PairScope, RegularizationSession, RegularizeConfig,
    RegularizeError, ValueCatalog, ValueId,
};
use catreg_store::Database;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use exit_codes::{
    regularize_exit_code, EXIT_CONFIG, EXIT_ERROR, EXIT_IMPORT_PARSE, EXIT_IO,
    EXIT_STATUS_INCOMPLETE, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "catreg")]
#[command(about = "Regularize raw (Make, Model) pairs against trusted years and expand filters")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Record store (SQLite). Defaults to <data dir>/catreg/catreg.db
    #[arg(long, global = true, env = "CATREG_DB")]
    db: Option<PathBuf>,

    /// Regularization config (TOML). Defaults to <config dir>/catreg/config.toml
    #[arg(long, global = true, env = "CATREG_CONFIG")]
    config: Option<PathBuf>,

    /// Log to stderr (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the record store and write a starter config
    #[command(after_help = "\
Examples:
  catreg init --trusted-years 2017,2018,2019,2020,2021,2022
  catreg --db ./vehicles.db --config ./catreg.toml init --trusted-years 2020 --force")]
    Init {
        /// Data years treated as authoritative
        #[arg(long, value_delimiter = ',', required = true)]
        trusted_years: Vec<i32>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Load canonical values or raw records from CSV
    #[command(subcommand)]
    Import(import::ImportCommands),

    /// List (Make, Model) pairs seen in untrusted years with their status
    #[command(after_help = "\
Examples:
  catreg pairs
  catreg pairs --uncurated-only --status unassigned
  catreg pairs --json | jq '.[] | select(.status == \"partial\")'")]
    Pairs {
        /// Only pairs that never occur in trusted years
        #[arg(long)]
        uncurated_only: bool,

        /// Only pairs with this completion status
        #[arg(long)]
        status: Option<StatusArg>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Run a full status sweep and summarize completion
    Status {
        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Exit 20 unless every pair is complete
        #[arg(long)]
        require_complete: bool,
    },

    /// Propose and insert mappings for exact matches (never touches mapped pairs)
    Automap {
        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Show the canonical hierarchy built from trusted years
    Hierarchy {
        /// Restrict to one make code
        #[arg(long)]
        make: Option<String>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Inspect and edit the mappings of one pair
    #[command(subcommand)]
    Mapping(mapping::MappingCommands),

    /// Expand a filter selection and run it against the record store
    #[command(after_help = "\
Examples:
  catreg filter --make ACME --fuel E
  catreg filter --make ACME --model X1 --ids --limit 20
  catreg filter --vehicle-type PAU --no-regularization
  catreg filter --fuel E --sql")]
    Filter {
        /// Make codes (repeatable)
        #[arg(long)]
        make: Vec<String>,

        /// Model codes (repeatable)
        #[arg(long)]
        model: Vec<String>,

        /// Fuel type codes (repeatable)
        #[arg(long)]
        fuel: Vec<String>,

        /// Vehicle type codes (repeatable)
        #[arg(long)]
        vehicle_type: Vec<String>,

        /// Match raw values only, ignoring regularization mappings
        #[arg(long)]
        no_regularization: bool,

        /// Print the expanded SQL predicate instead of running it
        #[arg(long)]
        sql: bool,

        /// Also list matching record ids
        #[arg(long)]
        ids: bool,

        /// Maximum number of ids to list
        #[arg(long, requires = "ids")]
        limit: Option<usize>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Unassigned,
    Partial,
    Complete,
}

impl From<StatusArg> for CompletionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Unassigned => CompletionStatus::Unassigned,
            StatusArg::Partial => CompletionStatus::Partial,
            StatusArg::Complete => CompletionStatus::Complete,
        }
    }
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  catreg-regularize ", env!("CARGO_PKG_VERSION"),
        "\nstore:   sqlite (bundled)",
    )
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // try_init also routes `log` records from the library crates.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let paths = Paths { db: cli.db, config: cli.config };

    let result = match cli.command {
        None => {
            eprintln!("usage: catreg <COMMAND>  (see catreg --help)");
            Err(CliError { code: EXIT_USAGE, message: String::new(), hint: None })
        }
        Some(Commands::Init { trusted_years, force }) => cmd_init(&paths, trusted_years, force),
        Some(Commands::Import(cmd)) => import::cmd_import(&paths, cmd),
        Some(Commands::Pairs { uncurated_only, status, json }) => {
            cmd_pairs(&paths, uncurated_only, status.map(Into::into), json)
        }
        Some(Commands::Status { json, require_complete }) => cmd_status(&paths, json, require_complete),
        Some(Commands::Automap { json }) => cmd_automap(&paths, json),
        Some(Commands::Hierarchy { make, json }) => cmd_hierarchy(&paths, make, json),
        Some(Commands::Mapping(cmd)) => mapping::cmd_mapping(&paths, cmd),
        Some(Commands::Filter {
            make, model, fuel, vehicle_type, no_regularization, sql, ids, limit, json,
        }) => {
            let request = FilterRequest { make, model, fuel, vehicle_type, no_regularization };
            cmd_filter(&paths, request, sql, ids, limit, json)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IMPORT_PARSE, message: msg.into(), hint: None }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Create error from an engine error with its registered exit code.
    pub fn regularize(err: RegularizeError) -> Self {
        let code = regularize_exit_code(&err);
        let hint = match &err {
            RegularizeError::ConfigParse(_) | RegularizeError::ConfigValidation(_) => {
                Some("fix the config file or recreate it with `catreg init --force`".to_string())
            }
            RegularizeError::NotFound(_) => {
                Some("the record store may have changed; re-run `catreg pairs`".to_string())
            }
            RegularizeError::Computation(_) => {
                Some("check that --db points at a catreg record store".to_string())
            }
            RegularizeError::Validation(_) => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<RegularizeError> for CliError {
    fn from(err: RegularizeError) -> Self {
        Self::regularize(err)
    }
}

// ============================================================================
// Store + session setup
// ============================================================================

/// Paths from the global flags; unset ones fall back to the platform dirs.
pub struct Paths {
    db: Option<PathBuf>,
    config: Option<PathBuf>,
}

impl Paths {
    fn db_path(&self) -> Result<PathBuf, CliError> {
        match &self.db {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("catreg").join("catreg.db"))
                .ok_or_else(|| CliError::args("cannot determine a data directory").with_hint("pass --db")),
        }
    }

    fn config_path(&self) -> Result<PathBuf, CliError> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join("catreg").join("config.toml"))
                .ok_or_else(|| {
                    CliError::args("cannot determine a config directory").with_hint("pass --config")
                }),
        }
    }

    pub fn load_config(&self) -> Result<RegularizeConfig, CliError> {
        let path = self.config_path()?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            CliError::config(format!("cannot read config {}: {e}", path.display()))
                .with_hint("create one with `catreg init --trusted-years <YEARS>`")
        })?;
        RegularizeConfig::from_toml(&text).map_err(CliError::regularize)
    }

    pub fn open_database(&self) -> Result<Database, CliError> {
        let path = self.db_path()?;
        ensure_parent(&path)?;
        Database::open(&path).map_err(CliError::regularize)
    }

    /// Open the store, sync its trusted years from the config and start a
    /// session over it.
    pub fn open_session(&self) -> Result<Workspace, CliError> {
        let config = self.load_config()?;
        let db = Arc::new(self.open_database()?);
        if db.set_trusted_years(&config.trusted_years)? {
            log::info!("trusted years synced from config");
        }
        let session = RegularizationSession::new(db.clone(), db.clone(), config)?;
        Ok(Workspace { db, session })
    }
}

pub struct Workspace {
    pub db: Arc<Database>,
    pub session: RegularizationSession,
}

fn ensure_parent(path: &Path) -> Result<(), CliError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| CliError::io(format!("cannot create {}: {e}", parent.display()))),
        _ => Ok(()),
    }
}

// ============================================================================
// Shared output helpers
// ============================================================================

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}").map_err(|e| CliError::io(e.to_string()))
}

/// Resolve a value code of one dimension to its id.
pub fn resolve_code(catalog: &ValueCatalog, kind: DimensionKind, code: &str) -> Result<ValueId, CliError> {
    catalog
        .by_code(kind, code)
        .map(|v| v.id)
        .ok_or_else(|| {
            CliError::args(format!("unknown {kind} code {code:?}"))
                .with_hint("`catreg hierarchy` lists the canonical codes")
        })
}

fn resolve_codes(catalog: &ValueCatalog, kind: DimensionKind, codes: &[String]) -> Result<BTreeSet<ValueId>, CliError> {
    codes.iter().map(|code| resolve_code(catalog, kind, code)).collect()
}

pub fn code_of(catalog: &ValueCatalog, kind: DimensionKind, id: ValueId) -> String {
    catalog
        .get(kind, id)
        .map(|v| v.code.clone())
        .unwrap_or_else(|| format!("#{id}"))
}

// ============================================================================
// init
// ============================================================================

fn config_template(trusted_years: &BTreeSet<i32>) -> String {
    let years = trusted_years
        .iter()
        .map(|y| y.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "# catreg regularization config\n\
         trusted_years = [{years}]\n\
         \n\
         [auto_map]\n\
         # VehicleType codes, highest priority first, used to break ties\n\
         cardinal_vehicle_types = []\n\
         # \"no_reference\" or \"assign_unspecified\"\n\
         null_fuel_policy = \"no_reference\"\n\
         \n\
         [validation]\n\
         strict_fuel_types = true\n"
    )
}

fn cmd_init(paths: &Paths, trusted_years: Vec<i32>, force: bool) -> Result<(), CliError> {
    let config_path = paths.config_path()?;
    if config_path.exists() && !force {
        return Err(CliError::config(format!("{} already exists", config_path.display()))
            .with_hint("pass --force to overwrite it"));
    }

    let years: BTreeSet<i32> = trusted_years.into_iter().collect();
    let text = config_template(&years);
    let config = RegularizeConfig::from_toml(&text).map_err(CliError::regularize)?;

    ensure_parent(&config_path)?;
    std::fs::write(&config_path, &text)
        .map_err(|e| CliError::io(format!("cannot write {}: {e}", config_path.display())))?;

    let db = paths.open_database()?;
    db.set_trusted_years(&config.trusted_years)?;

    eprintln!("wrote {}", config_path.display());
    eprintln!("record store ready: {} ({} records)", paths.db_path()?.display(), db.record_count()?);
    Ok(())
}

// ============================================================================
// pairs
// ============================================================================

fn cmd_pairs(
    paths: &Paths,
    uncurated_only: bool,
    status: Option<CompletionStatus>,
    json: bool,
) -> Result<(), CliError> {
    let ws = paths.open_session()?;
    // A failed sweep leaves the listing usable with the degraded board.
    if let Err(e) = ws.session.sweep_statuses() {
        log::warn!("status sweep failed: {e}");
    }

    let scope = if uncurated_only { PairScope::UncuratedOnly } else { PairScope::Untrusted };
    let rows: Vec<PairOverview> = ws
        .session
        .pair_overview(scope)?
        .into_iter()
        .filter(|row| status.map_or(true, |s| row.status == s))
        .collect();

    if json {
        return print_json(&rows);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let w = |e: io::Error| CliError::io(e.to_string());
    writeln!(out, "{:<14} {:<20} {:>8} {:>6}  {:<11} {:<8} {}", "MAKE", "MODEL", "RECORDS", "YEARS", "DATA YEARS", "TRUSTED", "STATUS")
        .map_err(w)?;
    for row in &rows {
        let p = &row.pair;
        writeln!(
            out,
            "{:<14} {:<20} {:>8} {:>6}  {:<11} {:<8} {}",
            row.make_code.as_deref().unwrap_or("?"),
            row.model_code.as_deref().unwrap_or("?"),
            p.record_count,
            p.model_years.len(),
            format!("{}-{}", p.first_data_year, p.last_data_year),
            if p.in_trusted_years { "yes" } else { "no" },
            row.status,
        )
        .map_err(w)?;
    }
    eprintln!("{} pairs", rows.len());
    Ok(())
}

// ============================================================================
// status
// ============================================================================

#[derive(Serialize)]
struct StatusOutput {
    pairs: usize,
    unassigned: usize,
    partial: usize,
    complete: usize,
    mapping_rows: u64,
}

fn cmd_status(paths: &Paths, json: bool, require_complete: bool) -> Result<(), CliError> {
    use catreg_regularize::source::MappingStore;

    let ws = paths.open_session()?;
    let summary = ws
        .session
        .spawn_status_sweep()?
        .join()
        .map_err(|_| CliError::general("status sweep thread panicked"))??;
    let pairs = ws.session.untrusted_pairs()?.len();

    let output = StatusOutput {
        pairs,
        unassigned: summary.unassigned,
        partial: summary.partial,
        complete: summary.complete,
        mapping_rows: ws.db.mapping_count()?,
    };

    if json {
        print_json(&output)?;
    } else {
        println!(
            "{} pairs: {} complete, {} partial, {} unassigned ({} mapping rows)",
            output.pairs, output.complete, output.partial, output.unassigned, output.mapping_rows
        );
    }

    if require_complete && output.complete < output.pairs {
        return Err(CliError {
            code: EXIT_STATUS_INCOMPLETE,
            message: format!("{} pairs are not complete", output.pairs - output.complete),
            hint: Some("`catreg pairs --status partial` lists the pairs left to review".to_string()),
        });
    }
    Ok(())
}

// ============================================================================
// automap
// ============================================================================

fn cmd_automap(paths: &Paths, json: bool) -> Result<(), CliError> {
    let ws = paths.open_session()?;
    let report = ws.session.run_auto_map()?;

    if json {
        print_json(&report)?;
    }
    eprintln!(
        "auto-map: {} pairs examined, {} already mapped, {} matched, {} inserted ({} rows)",
        report.pairs_examined,
        report.pairs_skipped_existing,
        report.pairs_matched,
        report.pairs_inserted,
        report.rows_inserted,
    );
    if report.pairs_skipped_at_commit > 0 {
        eprintln!("{} pairs were edited meanwhile and left untouched", report.pairs_skipped_at_commit);
    }
    Ok(())
}

// ============================================================================
// hierarchy
// ============================================================================

fn format_options<'a>(options: impl Iterator<Item = &'a catreg_regularize::hierarchy::ValueOption>) -> String {
    options
        .map(|o| format!("{}({})", o.value.code, o.record_count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_model(out: &mut impl Write, catalog: &ValueCatalog, node: &ModelNode) -> io::Result<()> {
    writeln!(out, "  {}  vehicle types: {}", node.model.code, format_options(node.vehicle_type_options.iter()))?;
    for (year, fuels) in &node.model_years {
        writeln!(
            out,
            "      {}: {}",
            code_of(catalog, DimensionKind::ModelYear, *year),
            format_options(fuels.iter())
        )?;
    }
    Ok(())
}

fn cmd_hierarchy(paths: &Paths, make: Option<String>, json: bool) -> Result<(), CliError> {
    let ws = paths.open_session()?;
    let catalog = ws.session.catalog()?;
    let hierarchy = ws.session.hierarchy()?;

    let makes: Vec<_> = match &make {
        Some(code) => {
            let id = resolve_code(&catalog, DimensionKind::Make, code)?;
            let node = hierarchy.make(id).ok_or_else(|| {
                CliError::regularize(RegularizeError::NotFound(format!(
                    "make {code} has no trusted-year records"
                )))
            })?;
            vec![node]
        }
        None => hierarchy.makes().collect(),
    };

    if json {
        return print_json(&makes);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for node in &makes {
        let heading = if node.make.description.is_empty() {
            node.make.code.clone()
        } else {
            format!("{} ({})", node.make.code, node.make.description)
        };
        writeln!(out, "{heading}").map_err(|e| CliError::io(e.to_string()))?;
        for model in node.models.values() {
            write_model(&mut out, &catalog, model).map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    eprintln!(
        "{} makes, {} models ({} overall)",
        makes.len(),
        makes.iter().map(|m| m.models.len()).sum::<usize>(),
        hierarchy.model_count()
    );
    Ok(())
}

// ============================================================================
// filter
// ============================================================================

struct FilterRequest {
    make: Vec<String>,
    model: Vec<String>,
    fuel: Vec<String>,
    vehicle_type: Vec<String>,
    no_regularization: bool,
}

impl FilterRequest {
    fn selection(&self, catalog: &ValueCatalog) -> Result<FilterSelection, CliError> {
        Ok(FilterSelection {
            makes: resolve_codes(catalog, DimensionKind::Make, &self.make)?,
            models: resolve_codes(catalog, DimensionKind::Model, &self.model)?,
            fuel_types: resolve_codes(catalog, DimensionKind::FuelType, &self.fuel)?,
            vehicle_types: resolve_codes(catalog, DimensionKind::VehicleType, &self.vehicle_type)?,
            regularization_enabled: !self.no_regularization,
        })
    }
}

#[derive(Serialize)]
struct FilterOutput {
    sql: String,
    params: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<i64>>,
}

fn cmd_filter(
    paths: &Paths,
    request: FilterRequest,
    sql_only: bool,
    ids: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<(), CliError> {
    let ws = paths.open_session()?;
    let catalog = ws.session.catalog()?;
    let selection = request.selection(&catalog)?;
    let predicate = ws.session.filter_predicate(&selection)?;

    let mut output = FilterOutput {
        sql: predicate.sql.clone(),
        params: predicate.params.clone(),
        count: None,
        ids: None,
    };
    if !sql_only {
        output.count = Some(ws.db.count_matching(&predicate)?);
        if ids {
            output.ids = Some(ws.db.matching_record_ids(&predicate, limit)?);
        }
    }

    if json {
        return print_json(&output);
    }

    if sql_only {
        println!("{}", output.sql);
        println!("-- params: {:?}", output.params);
        return Ok(());
    }
    if let Some(ids) = &output.ids {
        for id in ids {
            println!("{id}");
        }
    }
    let count = output.count.unwrap_or(0);
    if ids {
        eprintln!("{count} matching records");
    } else {
        println!("{count}");
    }
    Ok(())
}
