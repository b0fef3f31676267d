use std::collections::BTreeMap;

use catreg_regularize::model::{CanonicalValue, DimensionKind, PairKey, UncuratedPair, ValueCatalog, ValueId};
use catreg_regularize::source::{RawRecordStore, TrustedObservation};
use catreg_regularize::Result;
use rusqlite::{params, Connection, Params};

use crate::database::{sql_err, table, Database};

/// The row aliased `r` lies in a trusted data year.
const TRUSTED_ROW: &str = "EXISTS (SELECT 1 FROM trusted_year ty WHERE ty.year = r.data_year)";

/// Same (make, model) in any trusted year. Correlated, so NULL dimension
/// values on the trusted side never hide untrusted pairs.
const PAIR_IN_TRUSTED: &str = "EXISTS (SELECT 1 FROM vehicle_record t \
     JOIN trusted_year ty ON ty.year = t.data_year \
     WHERE t.make_id = r.make_id AND t.model_id = r.model_id)";

/// Per (pair, model year) aggregates over untrusted rows; `{filter}` adds
/// further conditions on `r`.
const PAIR_LISTING: &str = "SELECT r.make_id, r.model_id, r.model_year_id, COUNT(*), \
            MIN(r.data_year), MAX(r.data_year), {in_trusted} \
     FROM vehicle_record r \
     WHERE r.make_id IS NOT NULL AND r.model_id IS NOT NULL \
       AND NOT {trusted} {filter} \
     GROUP BY r.make_id, r.model_id, r.model_year_id \
     ORDER BY r.make_id, r.model_id, r.model_year_id";

struct ListingRow {
    pair: PairKey,
    model_year_id: Option<ValueId>,
    count: u64,
    first: i32,
    last: i32,
    in_trusted: bool,
}

fn list_pairs(conn: &Connection, filter: &str, params: impl Params) -> Result<Vec<UncuratedPair>> {
    let sql = PAIR_LISTING
        .replace("{in_trusted}", PAIR_IN_TRUSTED)
        .replace("{trusted}", TRUSTED_ROW)
        .replace("{filter}", filter);
    let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(ListingRow {
                pair: PairKey::new(ValueId(row.get(0)?), ValueId(row.get(1)?)),
                model_year_id: row.get::<_, Option<i64>>(2)?.map(ValueId),
                count: row.get::<_, i64>(3)? as u64,
                first: row.get(4)?,
                last: row.get(5)?,
                in_trusted: row.get(6)?,
            })
        })
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?;

    let mut pairs: BTreeMap<PairKey, UncuratedPair> = BTreeMap::new();
    for row in rows {
        let entry = pairs.entry(row.pair).or_insert_with(|| UncuratedPair {
            pair: row.pair,
            record_count: 0,
            model_years: BTreeMap::new(),
            first_data_year: row.first,
            last_data_year: row.last,
            in_trusted_years: row.in_trusted,
        });
        entry.record_count += row.count;
        entry.first_data_year = entry.first_data_year.min(row.first);
        entry.last_data_year = entry.last_data_year.max(row.last);
        if let Some(year) = row.model_year_id {
            *entry.model_years.entry(year).or_insert(0) += row.count;
        }
    }
    Ok(pairs.into_values().collect())
}

impl RawRecordStore for Database {
    fn data_version(&self) -> Result<u64> {
        let version: i64 = self
            .conn()
            .query_row(
                "SELECT CAST(value AS INTEGER) FROM meta WHERE key = 'data_version'",
                [],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        Ok(version as u64)
    }

    fn value_catalog(&self) -> Result<ValueCatalog> {
        let conn = self.conn();
        let mut catalog = ValueCatalog::new();
        for kind in DimensionKind::ALL {
            let mut stmt = conn
                .prepare(&format!("SELECT id, code, description FROM {}", table(kind)))
                .map_err(sql_err)?;
            let values = stmt
                .query_map([], |row| {
                    Ok(CanonicalValue {
                        id: ValueId(row.get(0)?),
                        kind,
                        code: row.get(1)?,
                        description: row.get(2)?,
                    })
                })
                .map_err(sql_err)?;
            for value in values {
                catalog.insert(value.map_err(sql_err)?);
            }
        }
        Ok(catalog)
    }

    fn trusted_observations(&self) -> Result<Vec<TrustedObservation>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT r.make_id, r.model_id, r.model_year_id, r.fuel_type_id, r.vehicle_type_id, COUNT(*) \
                 FROM vehicle_record r \
                 WHERE r.make_id IS NOT NULL AND r.model_id IS NOT NULL AND {TRUSTED_ROW} \
                 GROUP BY r.make_id, r.model_id, r.model_year_id, r.fuel_type_id, r.vehicle_type_id"
            ))
            .map_err(sql_err)?;
        let observations = stmt
            .query_map([], |row| {
                Ok(TrustedObservation {
                    pair: PairKey::new(ValueId(row.get(0)?), ValueId(row.get(1)?)),
                    model_year_id: row.get::<_, Option<i64>>(2)?.map(ValueId),
                    fuel_type_id: row.get::<_, Option<i64>>(3)?.map(ValueId),
                    vehicle_type_id: row.get::<_, Option<i64>>(4)?.map(ValueId),
                    record_count: row.get::<_, i64>(5)? as u64,
                })
            })
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        Ok(observations)
    }

    fn find_uncurated_pairs(&self) -> Result<Vec<UncuratedPair>> {
        let filter = format!("AND NOT {PAIR_IN_TRUSTED}");
        list_pairs(&self.conn(), &filter, [])
    }

    fn find_untrusted_pairs(&self) -> Result<Vec<UncuratedPair>> {
        list_pairs(&self.conn(), "", [])
    }

    fn model_years_for_pair(&self, pair: PairKey) -> Result<Vec<ValueId>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT r.model_year_id FROM vehicle_record r \
                 WHERE r.make_id = ?1 AND r.model_id = ?2 AND r.model_year_id IS NOT NULL \
                 AND NOT {TRUSTED_ROW} \
                 ORDER BY r.model_year_id"
            ))
            .map_err(sql_err)?;
        let years = stmt
            .query_map(params![pair.make_id.0, pair.model_id.0], |row| Ok(ValueId(row.get(0)?)))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        Ok(years)
    }

    fn untrusted_pair(&self, pair: PairKey) -> Result<Option<UncuratedPair>> {
        let pairs = list_pairs(
            &self.conn(),
            "AND r.make_id = ?1 AND r.model_id = ?2",
            params![pair.make_id.0, pair.model_id.0],
        )?;
        Ok(pairs.into_iter().next())
    }
}
