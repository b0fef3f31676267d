//! CLI Exit Code Registry
//!
//! Single source of truth for `catreg` exit codes. Scripts that drive
//! regularization runs branch on these, so treat them as a contract.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                                  |
//! |---------|------------------|----------------------------------------------|
//! | 0       | Universal        | Success                                      |
//! | 1       | Universal        | General error (unspecified)                  |
//! | 2       | Universal        | CLI usage error (bad args, unknown code)     |
//! | 3-9     | setup            | Config, store and input file problems        |
//! | 10-19   | regularization   | Rejected edits and vanished pairs/values     |
//! | 20-29   | status           | Completion checks (`status --require-complete`) |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in [`regularize_exit_code`] if it comes from the engine

use catreg_regularize::RegularizeError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, malformed `YEAR=CODE`, unknown value code.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Setup (3-9)
// =============================================================================

/// Config file missing, unparseable, or failing validation.
pub const EXIT_CONFIG: u8 = 3;

/// Record store could not be opened or a query failed.
pub const EXIT_STORE: u8 = 4;

/// Cannot read or write a file (import input, config template).
pub const EXIT_IO: u8 = 5;

/// Import input is not valid CSV or misses required columns.
pub const EXIT_IMPORT_PARSE: u8 = 6;

// =============================================================================
// Regularization (10-19)
// =============================================================================

/// Edit rejected: duplicate mapping key, fuel type outside the canonical
/// set under strict validation, or a concurrent auto-map run.
pub const EXIT_VALIDATION: u8 = 10;

/// A referenced pair or canonical value does not exist (any more).
pub const EXIT_NOT_FOUND: u8 = 11;

// =============================================================================
// Status (20-29)
// =============================================================================

/// `status --require-complete` found pairs that are not Complete.
pub const EXIT_STATUS_INCOMPLETE: u8 = 20;

/// Map an engine error to its exit code.
pub fn regularize_exit_code(err: &RegularizeError) -> u8 {
    match err {
        RegularizeError::ConfigParse(_) | RegularizeError::ConfigValidation(_) => EXIT_CONFIG,
        RegularizeError::Validation(_) => EXIT_VALIDATION,
        RegularizeError::NotFound(_) => EXIT_NOT_FOUND,
        RegularizeError::Computation(_) => EXIT_STORE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_CONFIG,
            EXIT_STORE,
            EXIT_IO,
            EXIT_IMPORT_PARSE,
            EXIT_VALIDATION,
            EXIT_NOT_FOUND,
            EXIT_STATUS_INCOMPLETE,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_their_range() {
        assert_eq!(regularize_exit_code(&RegularizeError::ConfigParse("x".into())), EXIT_CONFIG);
        assert_eq!(regularize_exit_code(&RegularizeError::Validation("x".into())), EXIT_VALIDATION);
        assert_eq!(regularize_exit_code(&RegularizeError::NotFound("x".into())), EXIT_NOT_FOUND);
        assert_eq!(regularize_exit_code(&RegularizeError::Computation("x".into())), EXIT_STORE);
    }
}
