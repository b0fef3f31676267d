use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegularizeError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (no trusted years, duplicate cardinal codes, ...).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Rejected edit: uniqueness violation, fuel type outside the canonical
    /// option set under strict mode, malformed assignment.
    #[error("validation error: {0}")]
    Validation(String),
    /// A pair or canonical value vanished, typically after a re-import.
    #[error("not found: {0}")]
    NotFound(String),
    /// Store unreachable or a query failed mid-computation.
    #[error("computation error: {0}")]
    Computation(String),
}

