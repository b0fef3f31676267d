use std::collections::BTreeSet;
use std::path::Path;

use catreg_regularize::{DimensionKind, RegularizeError, Result, ValueId};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension};

/// Map a driver error onto the engine taxonomy. A foreign key failure means
/// a referenced value is gone; other constraint violations are caller
/// mistakes; everything else means the store could not be used.
pub(crate) fn sql_err(e: rusqlite::Error) -> RegularizeError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            RegularizeError::NotFound(e.to_string())
        }
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            RegularizeError::Validation(e.to_string())
        }
        _ => RegularizeError::Computation(e.to_string()),
    }
}

pub(crate) fn table(kind: DimensionKind) -> &'static str {
    match kind {
        DimensionKind::Make => "make",
        DimensionKind::Model => "model",
        DimensionKind::ModelYear => "model_year",
        DimensionKind::FuelType => "fuel_type",
        DimensionKind::VehicleType => "vehicle_type",
    }
}

/// Bump the counter sessions compare against to detect upstream changes.
pub(crate) fn bump_data_version(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE meta SET value = CAST(value AS INTEGER) + 1 WHERE key = 'data_version'",
        [],
    )?;
    Ok(())
}

/// One raw fact row. Dimension columns are nullable in untrusted years.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactRecord {
    pub data_year: i32,
    pub make_id: Option<ValueId>,
    pub model_id: Option<ValueId>,
    pub model_year_id: Option<ValueId>,
    pub fuel_type_id: Option<ValueId>,
    pub vehicle_type_id: Option<ValueId>,
}

impl FactRecord {
    pub fn new(data_year: i32) -> Self {
        Self {
            data_year,
            ..Self::default()
        }
    }
}

/// SQLite-backed record and mapping store. One connection, serialised.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(sql_err)?;
        log::debug!("opened record store {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(sql_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(sql_err)?;
        crate::schema::init(&conn).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // -----------------------------------------------------------------------
    // Trusted years
    // -----------------------------------------------------------------------

    pub fn trusted_years(&self) -> Result<BTreeSet<i32>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT year FROM trusted_year ORDER BY year")
            .map_err(sql_err)?;
        let years = stmt
            .query_map([], |row| row.get(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<BTreeSet<i32>>>()
            .map_err(sql_err)?;
        Ok(years)
    }

    /// Replace the trusted-year set. Returns false (and leaves the data
    /// version alone) when the set is unchanged.
    pub fn set_trusted_years(&self, years: &BTreeSet<i32>) -> Result<bool> {
        if &self.trusted_years()? == years {
            return Ok(false);
        }
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute("DELETE FROM trusted_year", []).map_err(sql_err)?;
        for year in years {
            tx.execute("INSERT INTO trusted_year (year) VALUES (?1)", [year])
                .map_err(sql_err)?;
        }
        bump_data_version(&tx).map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        log::info!("trusted years set to {years:?}");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Enumerations
    // -----------------------------------------------------------------------

    /// Insert a value by code, or update its description. Returns its id.
    pub fn upsert_value(&self, kind: DimensionKind, code: &str, description: &str) -> Result<ValueId> {
        let table = table(kind);
        let conn = self.conn();
        let existing: Option<(i64, String)> = conn
            .query_row(
                &format!("SELECT id, description FROM {table} WHERE code = ?1"),
                [code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;

        match existing {
            Some((id, current)) if current == description => Ok(ValueId(id)),
            Some((id, _)) => {
                conn.execute(
                    &format!("UPDATE {table} SET description = ?1 WHERE id = ?2"),
                    params![description, id],
                )
                .map_err(sql_err)?;
                bump_data_version(&conn).map_err(sql_err)?;
                Ok(ValueId(id))
            }
            None => {
                conn.execute(
                    &format!("INSERT INTO {table} (code, description) VALUES (?1, ?2)"),
                    params![code, description],
                )
                .map_err(sql_err)?;
                bump_data_version(&conn).map_err(sql_err)?;
                Ok(ValueId(conn.last_insert_rowid()))
            }
        }
    }

    /// Insert a value with a caller-chosen id. Duplicate ids or codes are
    /// validation errors.
    pub fn insert_value_with_id(
        &self,
        kind: DimensionKind,
        id: ValueId,
        code: &str,
        description: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO {} (id, code, description) VALUES (?1, ?2, ?3)", table(kind)),
            params![id.0, code, description],
        )
        .map_err(sql_err)?;
        bump_data_version(&conn).map_err(sql_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub fn insert_records(&self, records: &[FactRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO vehicle_record
                        (data_year, make_id, model_id, model_year_id, fuel_type_id, vehicle_type_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(sql_err)?;
            for r in records {
                stmt.execute(params![
                    r.data_year,
                    r.make_id.map(|v| v.0),
                    r.model_id.map(|v| v.0),
                    r.model_year_id.map(|v| v.0),
                    r.fuel_type_id.map(|v| v.0),
                    r.vehicle_type_id.map(|v| v.0),
                ])
                .map_err(sql_err)?;
            }
        }
        bump_data_version(&tx).map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        log::debug!("inserted {} records", records.len());
        Ok(records.len())
    }

    pub fn record_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM vehicle_record", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as u64)
    }
}
