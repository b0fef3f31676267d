// Execution of expanded filter predicates against the fact table.

use catreg_regularize::predicate::{SqlPredicate, RECORD_ALIAS, RECORD_TABLE};
use catreg_regularize::Result;
use rusqlite::params_from_iter;

use crate::database::{sql_err, Database};

impl Database {
    pub fn count_matching(&self, predicate: &SqlPredicate) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {RECORD_TABLE} {RECORD_ALIAS} WHERE {}",
            predicate.sql
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(predicate.params.iter()), |row| row.get(0))
            .map_err(sql_err)?;
        Ok(count as u64)
    }

    /// Matching record ids in ascending order, at most `limit` when given.
    pub fn matching_record_ids(&self, predicate: &SqlPredicate, limit: Option<usize>) -> Result<Vec<i64>> {
        let mut sql = format!(
            "SELECT {RECORD_ALIAS}.id FROM {RECORD_TABLE} {RECORD_ALIAS} WHERE {} ORDER BY {RECORD_ALIAS}.id",
            predicate.sql
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let ids = stmt
            .query_map(params_from_iter(predicate.params.iter()), |row| row.get(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(sql_err)?;
        Ok(ids)
    }
}
