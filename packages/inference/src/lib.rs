#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Inference capabilities for pre-trained hotspot models.
//!
//! The pipeline never talks to a concrete model type. It depends on two
//! capabilities:
//!
//! - [`Forecaster`] turns a daily count history into a horizon of raw,
//!   family-named output series.
//! - [`Clusterer`] assigns a raw cluster label to each `[lat, lon]` point
//!   (in radians).
//!
//! A [`ForecastModel`] bundles a forecaster with the [`OutputAdapter`] that
//! renames its raw output series to the canonical mean/lower/upper triple.
//!
//! Model training is not part of this crate: every family here is built
//! from parameters that were estimated elsewhere.

pub mod arima;
pub mod exemplar;
pub mod historic_average;
pub mod output;
pub mod quantile;

use std::sync::Arc;

use thiserror::Error;

pub use output::{CanonicalForecast, OutputAdapter, RawForecast};

/// Errors raised while invoking a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model parameters are unusable.
    #[error("Invalid model parameters: {message}")]
    InvalidParameters {
        /// Description of what went wrong.
        message: String,
    },

    /// The history is too short for the model.
    #[error("Insufficient history: need at least {needed} observations, got {got}")]
    InsufficientHistory {
        /// Minimum number of observations.
        needed: usize,
        /// Observations supplied.
        got: usize,
    },

    /// A raw output series named by the output adapter is missing.
    #[error("Model output has no column '{column}'")]
    MissingOutputColumn {
        /// Raw column name.
        column: String,
    },

    /// The model returned a different number of values than requested.
    #[error("Model returned {got} values, expected {expected}")]
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// The confidence level is outside `1..=99`.
    #[error("Invalid confidence level {0}: expected 1-99")]
    InvalidLevel(u8),

    /// A raw cluster label cannot be used as a hotspot identifier.
    #[error("Invalid cluster label: {0}")]
    InvalidLabel(String),
}

/// A pre-trained time-series forecasting model.
pub trait Forecaster: Send + Sync {
    /// Model family name, also the default prefix of its raw output series.
    fn family(&self) -> &str;

    /// Forecasts `horizon` future points from `history` at a `level` %
    /// confidence level.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the model cannot produce a forecast for
    /// this history.
    fn predict(&self, history: &[f64], horizon: usize, level: u8)
    -> Result<RawForecast, ModelError>;
}

/// A pre-trained density-based clustering model in approximate-prediction
/// mode.
pub trait Clusterer: Send + Sync {
    /// Predicts a raw label for each `[latitude, longitude]` point given in
    /// radians. `None` or a negative label means noise.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if prediction fails.
    fn predict_labels(&self, points: &[[f64; 2]]) -> Result<Vec<Option<i64>>, ModelError>;
}

/// A forecaster paired with the adapter for its output naming.
#[derive(Clone)]
pub struct ForecastModel {
    forecaster: Arc<dyn Forecaster>,
    adapter: OutputAdapter,
}

impl ForecastModel {
    /// Wraps a forecaster with its family's default output adapter.
    #[must_use]
    pub fn new(forecaster: Arc<dyn Forecaster>) -> Self {
        let adapter = OutputAdapter::for_family(forecaster.family());
        Self {
            forecaster,
            adapter,
        }
    }

    /// Replaces the output adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: OutputAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Model family name.
    #[must_use]
    pub fn family(&self) -> &str {
        self.forecaster.family()
    }

    /// The output adapter in use.
    #[must_use]
    pub const fn adapter(&self) -> &OutputAdapter {
        &self.adapter
    }

    /// Forecasts and maps the raw output to the canonical triple.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the model fails or its output does not
    /// contain the columns the adapter expects.
    pub fn forecast(
        &self,
        history: &[f64],
        horizon: usize,
        level: u8,
    ) -> Result<CanonicalForecast, ModelError> {
        if level == 0 || level >= 100 {
            return Err(ModelError::InvalidLevel(level));
        }
        let raw = self.forecaster.predict(history, horizon, level)?;
        let canonical = self.adapter.apply(&raw, level)?;
        if canonical.len() != horizon {
            return Err(ModelError::LengthMismatch {
                expected: horizon,
                got: canonical.len(),
            });
        }
        Ok(canonical)
    }
}

impl std::fmt::Debug for ForecastModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastModel")
            .field("family", &self.family())
            .field("adapter", &self.adapter)
            .finish()
    }
}
