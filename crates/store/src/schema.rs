// Schema for the record store. Applied idempotently on every open.

use catreg_regularize::model::UNSPECIFIED_CODE;
use rusqlite::Connection;

pub(crate) const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS make (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS model (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

-- code is the four-digit year
CREATE TABLE IF NOT EXISTS model_year (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS fuel_type (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS vehicle_type (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS vehicle_record (
    id INTEGER PRIMARY KEY,
    data_year INTEGER NOT NULL,
    make_id INTEGER REFERENCES make(id),
    model_id INTEGER REFERENCES model(id),
    model_year_id INTEGER REFERENCES model_year(id),
    fuel_type_id INTEGER REFERENCES fuel_type(id),
    vehicle_type_id INTEGER REFERENCES vehicle_type(id)
);

CREATE INDEX IF NOT EXISTS idx_record_data_year ON vehicle_record(data_year);
CREATE INDEX IF NOT EXISTS idx_record_make ON vehicle_record(make_id);
CREATE INDEX IF NOT EXISTS idx_record_model ON vehicle_record(model_id);
CREATE INDEX IF NOT EXISTS idx_record_model_year ON vehicle_record(model_year_id);
CREATE INDEX IF NOT EXISTS idx_record_fuel_type ON vehicle_record(fuel_type_id);
CREATE INDEX IF NOT EXISTS idx_record_vehicle_type ON vehicle_record(vehicle_type_id);
CREATE INDEX IF NOT EXISTS idx_record_pair ON vehicle_record(make_id, model_id, model_year_id);

CREATE TABLE IF NOT EXISTS trusted_year (
    year INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS regularization_mapping (
    id INTEGER PRIMARY KEY,
    uncurated_make_id INTEGER NOT NULL REFERENCES make(id),
    uncurated_model_id INTEGER NOT NULL REFERENCES model(id),
    model_year_id INTEGER REFERENCES model_year(id),       -- NULL = Wildcard
    canonical_make_id INTEGER NOT NULL REFERENCES make(id),
    canonical_model_id INTEGER NOT NULL REFERENCES model(id),
    fuel_type_id INTEGER REFERENCES fuel_type(id),         -- Triplet rows only
    vehicle_type_id INTEGER REFERENCES vehicle_type(id),   -- Wildcard rows only
    record_count INTEGER NOT NULL DEFAULT 0,
    year_range_start INTEGER,
    year_range_end INTEGER,
    created_at TEXT NOT NULL,                              -- RFC 3339
    CHECK (model_year_id IS NULL OR vehicle_type_id IS NULL),
    CHECK (model_year_id IS NOT NULL OR fuel_type_id IS NULL)
);

-- Wildcard rows key on sentinel -1 so at most one exists per pair.
CREATE UNIQUE INDEX IF NOT EXISTS idx_mapping_key
    ON regularization_mapping(uncurated_make_id, uncurated_model_id, COALESCE(model_year_id, -1));
CREATE INDEX IF NOT EXISTS idx_mapping_model_year ON regularization_mapping(model_year_id);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR IGNORE INTO meta (key, value) VALUES ('data_version', '0');
"#;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    // Placeholder values every FuelType / VehicleType enumeration carries.
    for table in ["fuel_type", "vehicle_type"] {
        conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (code, description) VALUES (?1, 'Unspecified')"),
            [UNSPECIFIED_CODE],
        )?;
    }
    Ok(())
}
