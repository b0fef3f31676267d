use std::collections::{BTreeMap, HashSet};

use catreg_regularize::model::{MappingKey, MappingKind, PairKey, RegularizationMapping, ValueId};
use catreg_regularize::source::{InsertOutcome, MappingStore};
use catreg_regularize::{RegularizeError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{sql_err, Database};

const SELECT_MAPPING: &str = "SELECT uncurated_make_id, uncurated_model_id, model_year_id, \
            canonical_make_id, canonical_model_id, fuel_type_id, vehicle_type_id, \
            record_count, year_range_start, year_range_end, created_at \
     FROM regularization_mapping";

/// Column values as stored; `created_at` is parsed after the row is read.
struct StoredMapping {
    pair: PairKey,
    model_year_id: Option<i64>,
    canonical: PairKey,
    fuel_type_id: Option<i64>,
    vehicle_type_id: Option<i64>,
    record_count: i64,
    year_range_start: Option<i32>,
    year_range_end: Option<i32>,
    created_at: String,
}

impl StoredMapping {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pair: PairKey::new(ValueId(row.get(0)?), ValueId(row.get(1)?)),
            model_year_id: row.get(2)?,
            canonical: PairKey::new(ValueId(row.get(3)?), ValueId(row.get(4)?)),
            fuel_type_id: row.get(5)?,
            vehicle_type_id: row.get(6)?,
            record_count: row.get(7)?,
            year_range_start: row.get(8)?,
            year_range_end: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_mapping(self) -> Result<RegularizationMapping> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| {
                RegularizeError::Computation(format!(
                    "mapping for {} has unreadable created_at {:?}: {e}",
                    self.pair, self.created_at
                ))
            })?
            .with_timezone(&Utc);
        let kind = match self.model_year_id {
            None => MappingKind::Wildcard {
                vehicle_type_id: self.vehicle_type_id.map(ValueId),
            },
            Some(year) => MappingKind::Triplet {
                model_year_id: ValueId(year),
                fuel_type_id: self.fuel_type_id.map(ValueId),
            },
        };
        Ok(RegularizationMapping {
            pair: self.pair,
            canonical: self.canonical,
            kind,
            record_count: self.record_count.max(0) as u64,
            year_range_start: self.year_range_start,
            year_range_end: self.year_range_end,
            created_at,
        })
    }
}

fn query_mappings(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Vec<RegularizationMapping>> {
    let sql = format!(
        "{SELECT_MAPPING} {filter} ORDER BY uncurated_make_id, uncurated_model_id, COALESCE(model_year_id, -1)"
    );
    let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
    let stored = stmt
        .query_map(params, StoredMapping::from_row)
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?;
    stored.into_iter().map(StoredMapping::into_mapping).collect()
}

fn insert_row(conn: &Connection, row: &RegularizationMapping) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO regularization_mapping
            (uncurated_make_id, uncurated_model_id, model_year_id,
             canonical_make_id, canonical_model_id, fuel_type_id, vehicle_type_id,
             record_count, year_range_start, year_range_end, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.pair.make_id.0,
            row.pair.model_id.0,
            row.kind.model_year_id().map(|v| v.0),
            row.canonical.make_id.0,
            row.canonical.model_id.0,
            row.fuel_type_id().map(|v| v.0),
            row.vehicle_type_id().map(|v| v.0),
            row.record_count as i64,
            row.year_range_start,
            row.year_range_end,
            row.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn pair_has_rows(conn: &Connection, pair: PairKey) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM regularization_mapping
                        WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2)",
        params![pair.make_id.0, pair.model_id.0],
        |row| row.get(0),
    )
}

/// `model_year_id IS ?3` matches the Wildcard row when the year is NULL.
const KEY_FILTER: &str =
    "uncurated_make_id = ?1 AND uncurated_model_id = ?2 AND model_year_id IS ?3";

impl MappingStore for Database {
    fn has_mappings(&self) -> Result<bool> {
        self.conn()
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM regularization_mapping)",
                [],
                |row| row.get(0),
            )
            .map_err(sql_err)
    }

    fn mapping_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM regularization_mapping", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as u64)
    }

    fn all_mappings(&self) -> Result<Vec<RegularizationMapping>> {
        query_mappings(&self.conn(), "", [])
    }

    fn mappings_for_pair(&self, pair: PairKey) -> Result<Vec<RegularizationMapping>> {
        query_mappings(
            &self.conn(),
            "WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2",
            params![pair.make_id.0, pair.model_id.0],
        )
    }

    fn mapped_pairs(&self) -> Result<HashSet<PairKey>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT uncurated_make_id, uncurated_model_id FROM regularization_mapping")
            .map_err(sql_err)?;
        let pairs = stmt
            .query_map([], |row| Ok(PairKey::new(ValueId(row.get(0)?), ValueId(row.get(1)?))))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .map_err(sql_err)?;
        Ok(pairs)
    }

    fn insert_unmapped(&self, batches: &[Vec<RegularizationMapping>]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        for batch in batches {
            let Some(first) = batch.first() else {
                continue;
            };
            // Re-checked inside the transaction: an editor may have saved
            // the pair since the proposal was made.
            if pair_has_rows(&tx, first.pair).map_err(sql_err)? {
                outcome.pairs_skipped += 1;
                continue;
            }
            for row in batch {
                insert_row(&tx, row).map_err(sql_err)?;
            }
            outcome.pairs_inserted += 1;
            outcome.rows_inserted += batch.len();
        }
        tx.commit().map_err(sql_err)?;
        Ok(outcome)
    }

    fn save_mappings(&self, rows: &[RegularizationMapping]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(sql_err)?;
        let mut canonical: BTreeMap<PairKey, PairKey> = BTreeMap::new();
        for row in rows {
            tx.execute(
                &format!("DELETE FROM regularization_mapping WHERE {KEY_FILTER}"),
                params![row.pair.make_id.0, row.pair.model_id.0, row.kind.model_year_id().map(|v| v.0)],
            )
            .map_err(sql_err)?;
            insert_row(&tx, row).map_err(sql_err)?;
            canonical.insert(row.pair, row.canonical);
        }
        for (pair, target) in canonical {
            tx.execute(
                "UPDATE regularization_mapping SET canonical_make_id = ?3, canonical_model_id = ?4
                 WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2",
                params![pair.make_id.0, pair.model_id.0, target.make_id.0, target.model_id.0],
            )
            .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)?;
        Ok(())
    }

    fn insert_mapping(&self, row: &RegularizationMapping) -> Result<()> {
        let conn = self.conn();
        let current: Option<(i64, i64)> = conn
            .query_row(
                "SELECT canonical_make_id, canonical_model_id FROM regularization_mapping
                 WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2 LIMIT 1",
                params![row.pair.make_id.0, row.pair.model_id.0],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;
        if let Some((make, model)) = current {
            let existing = PairKey::new(ValueId(make), ValueId(model));
            if existing != row.canonical {
                return Err(RegularizeError::Validation(format!(
                    "{} already resolves to {existing}; save an assignment to change it",
                    row.pair
                )));
            }
        }

        let exists: bool = conn
            .query_row(
                &format!("SELECT EXISTS (SELECT 1 FROM regularization_mapping WHERE {KEY_FILTER})"),
                params![row.pair.make_id.0, row.pair.model_id.0, row.kind.model_year_id().map(|v| v.0)],
                |r| r.get(0),
            )
            .map_err(sql_err)?;
        if exists {
            return Err(RegularizeError::Validation(format!("mapping {} already exists", row.key())));
        }
        insert_row(&conn, row).map_err(sql_err)
    }

    fn remove_mapping(&self, key: &MappingKey) -> Result<bool> {
        let removed = self
            .conn()
            .execute(
                &format!("DELETE FROM regularization_mapping WHERE {KEY_FILTER}"),
                params![key.pair.make_id.0, key.pair.model_id.0, key.model_year_id.map(|v| v.0)],
            )
            .map_err(sql_err)?;
        Ok(removed > 0)
    }

    fn clear_pair(&self, pair: PairKey) -> Result<usize> {
        self.conn()
            .execute(
                "DELETE FROM regularization_mapping WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2",
                params![pair.make_id.0, pair.model_id.0],
            )
            .map_err(sql_err)
    }
}
