//! Filter predicate AST over raw fact rows, rendered to parameterised SQL.
//!
//! Rendering contract with the store:
//! - fact rows are read from `vehicle_record` aliased `r`
//! - mapping rows live in `regularization_mapping`, trusted years in `trusted_year`
//! - every membership test against another table is `EXISTS` / `NOT EXISTS`,
//!   never `NOT IN`, so NULL columns cannot poison a whole result

use std::fmt::Write;

use crate::model::ValueId;

pub const RECORD_TABLE: &str = "vehicle_record";
pub const RECORD_ALIAS: &str = "r";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordColumn {
    Make,
    Model,
    ModelYear,
    FuelType,
    VehicleType,
}

impl RecordColumn {
    fn sql(self) -> &'static str {
        match self {
            Self::Make => "r.make_id",
            Self::Model => "r.model_id",
            Self::ModelYear => "r.model_year_id",
            Self::FuelType => "r.fuel_type_id",
            Self::VehicleType => "r.vehicle_type_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingColumn {
    CanonicalMake,
    CanonicalModel,
    FuelType,
    VehicleType,
}

impl MappingColumn {
    fn sql(self) -> &'static str {
        match self {
            Self::CanonicalMake => "m.canonical_make_id",
            Self::CanonicalModel => "m.canonical_model_id",
            Self::FuelType => "m.fuel_type_id",
            Self::VehicleType => "m.vehicle_type_id",
        }
    }
}

/// Which mapping rows of the record's raw (make, model) are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// Any row of the pair.
    Pair,
    /// The pair's Wildcard row.
    Wildcard,
    /// The pair's Triplet for the record's own model year.
    SameModelYear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    In {
        column: RecordColumn,
        values: Vec<ValueId>,
    },
    IsNull(RecordColumn),
    /// The record's data year is in the trusted set.
    TrustedYear,
    MappingExists {
        correlation: Correlation,
        filters: Vec<(MappingColumn, Vec<ValueId>)>,
    },
}

impl Predicate {
    /// Conjunction with constant folding.
    pub fn and(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut kept = Vec::new();
        for part in parts {
            match part {
                Self::True => {}
                Self::False => return Self::False,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::True,
            1 => kept.remove(0),
            _ => Self::And(kept),
        }
    }

    /// Disjunction with constant folding.
    pub fn or(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut kept = Vec::new();
        for part in parts {
            match part {
                Self::False => {}
                Self::True => return Self::True,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Self::False,
            1 => kept.remove(0),
            _ => Self::Or(kept),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Predicate) -> Self {
        match inner {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Not(p) => *p,
            other => Self::Not(Box::new(other)),
        }
    }

    pub fn is_in(column: RecordColumn, values: impl IntoIterator<Item = ValueId>) -> Self {
        Self::In {
            column,
            values: values.into_iter().collect(),
        }
    }

    pub fn to_sql(&self) -> SqlPredicate {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render(&mut sql, &mut params);
        SqlPredicate { sql, params }
    }

    fn render(&self, out: &mut String, params: &mut Vec<i64>) {
        match self {
            Self::True => out.push('1'),
            Self::False => out.push('0'),
            Self::And(parts) => render_joined(parts, " AND ", out, params),
            Self::Or(parts) => render_joined(parts, " OR ", out, params),
            Self::Not(inner) => {
                out.push_str("NOT ");
                inner.render(out, params);
            }
            Self::In { column, values } => render_in(column.sql(), values, out, params),
            Self::IsNull(column) => {
                let _ = write!(out, "{} IS NULL", column.sql());
            }
            Self::TrustedYear => {
                out.push_str("EXISTS (SELECT 1 FROM trusted_year ty WHERE ty.year = r.data_year)");
            }
            Self::MappingExists { correlation, filters } => {
                out.push_str(
                    "EXISTS (SELECT 1 FROM regularization_mapping m \
                     WHERE m.uncurated_make_id = r.make_id \
                     AND m.uncurated_model_id = r.model_id",
                );
                match correlation {
                    Correlation::Pair => {}
                    Correlation::Wildcard => out.push_str(" AND m.model_year_id IS NULL"),
                    Correlation::SameModelYear => {
                        out.push_str(" AND m.model_year_id = r.model_year_id");
                    }
                }
                for (column, values) in filters {
                    out.push_str(" AND ");
                    render_in(column.sql(), values, out, params);
                }
                out.push(')');
            }
        }
    }
}

fn render_joined(parts: &[Predicate], sep: &str, out: &mut String, params: &mut Vec<i64>) {
    out.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        part.render(out, params);
    }
    out.push(')');
}

fn render_in(column: &str, values: &[ValueId], out: &mut String, params: &mut Vec<i64>) {
    if values.is_empty() {
        out.push('0');
        return;
    }
    let _ = write!(out, "{column} IN (");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
        params.push(value.0);
    }
    out.push(')');
}

/// SQL boolean expression with positional `?` parameters, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<i64>,
}
