//! Raw model output and its mapping to canonical forecast series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Placeholder substituted with the confidence level in adapter column
/// names.
const LEVEL_PLACEHOLDER: &str = "{level}";

/// Output series of one forecast call, keyed by the family's own column
/// names (e.g. `AutoARIMA`, `AutoARIMA-lo-95`, `AutoARIMA-hi-95`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawForecast {
    columns: BTreeMap<String, Vec<f64>>,
}

impl RawForecast {
    /// Adds or replaces a column.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.columns.insert(name.into(), values);
    }

    /// Returns a column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    fn column(&self, name: &str) -> Result<Vec<f64>, ModelError> {
        self.get(name)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| ModelError::MissingOutputColumn {
                column: name.to_string(),
            })
    }
}

/// Forecast series under the canonical names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalForecast {
    /// Point estimates.
    pub mean: Vec<f64>,
    /// Lower confidence bounds.
    pub lower: Vec<f64>,
    /// Upper confidence bounds.
    pub upper: Vec<f64>,
}

impl CanonicalForecast {
    /// Number of forecast points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.mean.len()
    }

    /// Whether the forecast has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

/// Raw column names that hold the point estimate and the band of one model
/// family. `{level}` in a name is replaced with the requested confidence
/// level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAdapter {
    /// Column holding the point estimate.
    pub mean: String,
    /// Column holding the lower bound.
    pub lower: String,
    /// Column holding the upper bound.
    pub upper: String,
}

impl OutputAdapter {
    /// Creates an adapter from explicit column names.
    #[must_use]
    pub fn new(
        mean: impl Into<String>,
        lower: impl Into<String>,
        upper: impl Into<String>,
    ) -> Self {
        Self {
            mean: mean.into(),
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Default naming of a family: `<family>`, `<family>-lo-<level>`,
    /// `<family>-hi-<level>`.
    #[must_use]
    pub fn for_family(family: &str) -> Self {
        Self::new(
            family,
            format!("{family}-lo-{LEVEL_PLACEHOLDER}"),
            format!("{family}-hi-{LEVEL_PLACEHOLDER}"),
        )
    }

    /// Extracts the canonical series from a raw forecast. Several canonical
    /// series may map to the same raw column.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingOutputColumn`] if a mapped column is
    /// absent, or [`ModelError::LengthMismatch`] if the series differ in
    /// length.
    pub fn apply(&self, raw: &RawForecast, level: u8) -> Result<CanonicalForecast, ModelError> {
        let level = level.to_string();
        let mean = raw.column(&self.mean.replace(LEVEL_PLACEHOLDER, &level))?;
        let lower = raw.column(&self.lower.replace(LEVEL_PLACEHOLDER, &level))?;
        let upper = raw.column(&self.upper.replace(LEVEL_PLACEHOLDER, &level))?;

        for other in [&lower, &upper] {
            if other.len() != mean.len() {
                return Err(ModelError::LengthMismatch {
                    expected: mean.len(),
                    got: other.len(),
                });
            }
        }

        Ok(CanonicalForecast { mean, lower, upper })
    }
}
