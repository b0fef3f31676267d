//! `catreg-store`: SQLite storage for raw vehicle records and
//! regularization mappings.
//!
//! [`Database`] implements both storage seams of `catreg-regularize`
//! ([`RawRecordStore`](catreg_regularize::source::RawRecordStore) and
//! [`MappingStore`](catreg_regularize::source::MappingStore)) and executes
//! expanded filter predicates.

mod database;
mod mappings;
mod query;
mod records;
mod schema;

pub use database::{Database, FactRecord};
