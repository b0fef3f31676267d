//! `catreg-regularize`: categorical regularization engine.
//!
//! Maps raw (Make, Model) pairs observed in untrusted data years onto the
//! canonical hierarchy built from trusted years, tracks per-pair completion,
//! and rewrites filter predicates so trusted and resolved-untrusted records
//! combine correctly. Storage is reached only through the traits in
//! [`source`]; no SQL driver dependency.

pub mod automap;
pub mod cache;
pub mod config;
pub mod error;
pub mod expand;
pub mod hierarchy;
pub mod model;
pub mod pairs;
pub mod predicate;
pub mod session;
pub mod source;
pub mod status;

pub use config::RegularizeConfig;
pub use error::RegularizeError;
pub use model::{
    CanonicalValue, CompletionStatus, DimensionKind, MappingKey, MappingKind, PairAssignment,
    PairKey, RegularizationMapping, UncuratedPair, ValueCatalog, ValueId,
};
pub use session::{PairScope, RegularizationSession};

pub type Result<T> = std::result::Result<T, RegularizeError>;
