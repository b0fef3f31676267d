use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;

use crate::error::RegularizeError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegularizeConfig {
    /// Data years treated as authoritative. Everything else is untrusted.
    pub trusted_years: BTreeSet<i32>,
    #[serde(default)]
    pub auto_map: AutoMapConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

// ---------------------------------------------------------------------------
// Auto-mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoMapConfig {
    /// Priority-ordered VehicleType codes used to break ties when a model
    /// has several observed vehicle types.
    #[serde(default)]
    pub cardinal_vehicle_types: Vec<String>,
    #[serde(default)]
    pub null_fuel_policy: NullFuelPolicy,
}

/// How trusted rows with a NULL FuelType (records predating fuel-type
/// collection) feed the canonical hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NullFuelPolicy {
    /// No canonical reference; the year is left to human review.
    #[default]
    NoReference,
    /// Count the rows as `Unspecified`; a year observed only that way is
    /// auto-assigned `Unspecified`.
    AssignUnspecified,
}

impl std::fmt::Display for NullFuelPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReference => write!(f, "no_reference"),
            Self::AssignUnspecified => write!(f, "assign_unspecified"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Reject fuel types outside the canonical Model x Year option set.
    #[serde(default = "default_strict")]
    pub strict_fuel_types: bool,
}

fn default_strict() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_fuel_types: default_strict(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

impl RegularizeConfig {
    pub fn new(trusted_years: impl IntoIterator<Item = i32>) -> Self {
        Self {
            trusted_years: trusted_years.into_iter().collect(),
            auto_map: AutoMapConfig::default(),
            validation: ValidationConfig::default(),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, RegularizeError> {
        let config: RegularizeConfig =
            toml::from_str(input).map_err(|e| RegularizeError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RegularizeError> {
        if self.trusted_years.is_empty() {
            return Err(RegularizeError::ConfigValidation(
                "at least one trusted year is required".into(),
            ));
        }

        if let Some(year) = self
            .trusted_years
            .iter()
            .find(|y| !(MIN_YEAR..=MAX_YEAR).contains(*y))
        {
            return Err(RegularizeError::ConfigValidation(format!(
                "trusted year {year} outside {MIN_YEAR}..={MAX_YEAR}"
            )));
        }

        let mut seen = HashSet::new();
        for code in &self.auto_map.cardinal_vehicle_types {
            if code.trim().is_empty() {
                return Err(RegularizeError::ConfigValidation(
                    "cardinal vehicle type codes must not be empty".into(),
                ));
            }
            if !seen.insert(code.as_str()) {
                return Err(RegularizeError::ConfigValidation(format!(
                    "duplicate cardinal vehicle type '{code}'"
                )));
            }
        }

        Ok(())
    }

    pub fn is_trusted(&self, data_year: i32) -> bool {
        self.trusted_years.contains(&data_year)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
