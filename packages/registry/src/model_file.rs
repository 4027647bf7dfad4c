//! On-disk model file format.
//!
//! A model file is a serialized [`ModelFile`], tagged by `family`:
//!
//! ```json
//! { "family": "auto_arima", "params": { "ar": [0.4], "d": 1, "sigma2": 2.1 } }
//! { "family": "historic_average",
//!   "output": { "mean": "HA", "lower": "HA-lo-{level}", "upper": "HA-hi-{level}" } }
//! { "family": "exemplar", "params": { "exemplars": [...], "max_reachability": 0.0001 } }
//! ```
//!
//! The encoding is chosen by extension: `.json`, or `.msgpack`/`.mpk` for
//! MessagePack with named fields.

use std::path::Path;
use std::sync::Arc;

use crime_hotspot_inference::arima::{Arima, ArimaParams};
use crime_hotspot_inference::exemplar::{ExemplarClusterer, ExemplarParams};
use crime_hotspot_inference::historic_average::HistoricAverage;
use crime_hotspot_inference::{Clusterer, ForecastModel, ModelError, OutputAdapter};
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Serialization format of a model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// JSON document.
    Json,
    /// MessagePack document with named fields.
    MessagePack,
}

impl ModelFormat {
    /// Detects the format from a file extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "msgpack" | "mpk" => Some(Self::MessagePack),
            _ => None,
        }
    }
}

/// A serialized model of one of the supported families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelFile {
    /// Fitted ARIMA forecaster.
    AutoArima {
        /// Fitted coefficients.
        params: ArimaParams,
        /// Output naming override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<OutputAdapter>,
    },
    /// Historic-average forecaster.
    HistoricAverage {
        /// Output naming override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<OutputAdapter>,
    },
    /// Exemplar-based clustering model.
    Exemplar {
        /// Exemplars and reachability threshold.
        params: ExemplarParams,
    },
}

/// A deserialized model ready for inference.
pub enum LoadedModel {
    /// A per-hotspot forecasting model.
    Forecaster(ForecastModel),
    /// A city's clustering model.
    Clusterer(Arc<dyn Clusterer>),
}

impl ModelFile {
    /// Reads and decodes a model file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the file cannot be read or decoded.
    pub fn read(path: &Path, format: ModelFormat) -> Result<Self, RegistryError> {
        let bytes = std::fs::read(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::decode(&bytes, format).map_err(|e| e.with_path(path))
    }

    /// Decodes a model file from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Json`] or [`RegistryError::MessagePack`] if
    /// the bytes are not a valid model file.
    pub fn decode(bytes: &[u8], format: ModelFormat) -> Result<Self, RegistryError> {
        match format {
            ModelFormat::Json => {
                serde_json::from_slice(bytes).map_err(|source| RegistryError::Json {
                    path: String::new(),
                    source,
                })
            }
            ModelFormat::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|source| RegistryError::MessagePack {
                    path: String::new(),
                    source,
                })
            }
        }
    }

    /// Builds the runtime model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the stored parameters are unusable.
    pub fn build(self) -> Result<LoadedModel, ModelError> {
        Ok(match self {
            Self::AutoArima { params, output } => {
                let model = ForecastModel::new(Arc::new(Arima::new(params)?));
                LoadedModel::Forecaster(with_output(model, output))
            }
            Self::HistoricAverage { output } => {
                let model = ForecastModel::new(Arc::new(HistoricAverage));
                LoadedModel::Forecaster(with_output(model, output))
            }
            Self::Exemplar { params } => {
                LoadedModel::Clusterer(Arc::new(ExemplarClusterer::new(params)?))
            }
        })
    }
}

fn with_output(model: ForecastModel, output: Option<OutputAdapter>) -> ForecastModel {
    match output {
        Some(adapter) => model.with_adapter(adapter),
        None => model,
    }
}

/// Extracts the registry key from a model file name: the lowercased file
/// name up to the first `.`, then up to the first `_`.
///
/// `7_autoarima.json` → `"7"`, `HDBSCAN_sp.msgpack` → `"hdbscan"`.
#[must_use]
pub fn model_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    let stem = name.split('.').next()?;
    let key = stem.split('_').next()?;
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}
