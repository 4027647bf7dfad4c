#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-city registry of pre-trained models.
//!
//! The models root holds one directory per city and one file per model:
//!
//! ```text
//! ml/models/
//!   sao_paulo/
//!     hdbscan_model.json      <- clustering model (reserved key)
//!     0_autoarima.json        <- forecaster for hotspot 0
//!     7_autoarima.msgpack     <- forecaster for hotspot 7
//! ```
//!
//! The registry is loaded once at startup into an immutable
//! [`ModelRegistry`] snapshot. [`SharedRegistry`] hands out snapshots to
//! request handlers and replaces the whole snapshot on reload, so a request
//! never observes a half-loaded registry.

pub mod model_file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crime_hotspot_incident_models::HotspotId;
use crime_hotspot_inference::{Clusterer, ForecastModel, ModelError};

use model_file::{LoadedModel, ModelFile, ModelFormat, model_key};

/// Registry key of each city's clustering model. A file named
/// `hdbscan_<anything>.json` holds it.
pub const CLUSTERING_MODEL_KEY: &str = "hdbscan";

/// Errors that can occur while loading the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The models root is missing or not a directory.
    #[error("Models root is not a directory: {0}")]
    NotADirectory(String),

    /// I/O error reading a directory or file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A JSON model file could not be decoded.
    #[error("Invalid JSON model file {path}: {source}")]
    Json {
        /// Model file path.
        path: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// A MessagePack model file could not be decoded.
    #[error("Invalid MessagePack model file {path}: {source}")]
    MessagePack {
        /// Model file path.
        path: String,
        /// Underlying decode error.
        source: rmp_serde::decode::Error,
    },

    /// A model file decoded but its parameters are unusable.
    #[error("Invalid model in {path}: {source}")]
    Model {
        /// Model file path.
        path: String,
        /// Underlying model error.
        source: ModelError,
    },

    /// The file name's key is neither the clustering key nor a hotspot id.
    #[error("Invalid model key '{key}' in {path}: expected the clustering key or a hotspot id")]
    InvalidModelKey {
        /// Extracted key.
        key: String,
        /// Model file path.
        path: String,
    },

    /// Two files in one city map to the same key.
    #[error("Duplicate model key '{key}' for city '{city}' ({path})")]
    DuplicateModel {
        /// City directory name.
        city: String,
        /// Duplicated key.
        key: String,
        /// Second file with the key.
        path: String,
    },

    /// A clustering model under a hotspot key, or the reverse.
    #[error("Wrong model kind in {path}: {message}")]
    WrongModelKind {
        /// Model file path.
        path: String,
        /// Description of the mismatch.
        message: String,
    },
}

impl RegistryError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.display().to_string();
        match self {
            Self::Json { source, .. } => Self::Json { path, source },
            Self::MessagePack { source, .. } => Self::MessagePack { path, source },
            other => other,
        }
    }
}

/// All models of one city.
pub struct CityModels {
    city: String,
    clusterer: Option<Arc<dyn Clusterer>>,
    forecasters: BTreeMap<HotspotId, ForecastModel>,
}

impl CityModels {
    /// Creates an empty model set for a city.
    #[must_use]
    pub fn new(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            clusterer: None,
            forecasters: BTreeMap::new(),
        }
    }

    /// Sets the clustering model.
    #[must_use]
    pub fn with_clusterer(mut self, clusterer: Arc<dyn Clusterer>) -> Self {
        self.clusterer = Some(clusterer);
        self
    }

    /// Adds the forecasting model of a hotspot.
    #[must_use]
    pub fn with_forecaster(mut self, hotspot_id: HotspotId, model: ForecastModel) -> Self {
        self.forecasters.insert(hotspot_id, model);
        self
    }

    /// City name (the directory name on disk).
    #[must_use]
    pub fn city(&self) -> &str {
        &self.city
    }

    /// The clustering model, if one was loaded.
    #[must_use]
    pub fn clusterer(&self) -> Option<&Arc<dyn Clusterer>> {
        self.clusterer.as_ref()
    }

    /// The forecasting model of a hotspot.
    #[must_use]
    pub fn forecaster(&self, hotspot_id: HotspotId) -> Option<&ForecastModel> {
        self.forecasters.get(&hotspot_id)
    }

    /// Hotspots with a forecasting model, in ascending order.
    pub fn hotspot_ids(&self) -> impl Iterator<Item = HotspotId> + '_ {
        self.forecasters.keys().copied()
    }

    /// Number of forecasting models.
    #[must_use]
    pub fn forecaster_count(&self) -> usize {
        self.forecasters.len()
    }

    fn load(city: &str, dir: &Path) -> Result<Self, RegistryError> {
        let mut models = Self::new(city);

        for path in sorted_entries(dir)? {
            if !path.is_file() {
                continue;
            }
            let Some(format) = ModelFormat::from_path(&path) else {
                log::debug!("Skipping non-model file {}", path.display());
                continue;
            };
            let Some(key) = model_key(&path) else {
                log::debug!("Skipping model file without a key: {}", path.display());
                continue;
            };

            let model = ModelFile::read(&path, format)?
                .build()
                .map_err(|source| RegistryError::Model {
                    path: path.display().to_string(),
                    source,
                })?;

            models.insert(&key, model, &path)?;
        }

        if models.clusterer.is_none() {
            log::warn!("City '{city}' has no clustering model ('{CLUSTERING_MODEL_KEY}')");
        }
        log::info!(
            "Loaded {} forecasting models for city '{city}'",
            models.forecasters.len()
        );

        Ok(models)
    }

    fn insert(&mut self, key: &str, model: LoadedModel, path: &Path) -> Result<(), RegistryError> {
        let duplicate = || RegistryError::DuplicateModel {
            city: self.city.clone(),
            key: key.to_string(),
            path: path.display().to_string(),
        };

        if key == CLUSTERING_MODEL_KEY {
            let LoadedModel::Clusterer(clusterer) = model else {
                return Err(RegistryError::WrongModelKind {
                    path: path.display().to_string(),
                    message: format!("'{CLUSTERING_MODEL_KEY}' must hold a clustering model"),
                });
            };
            if self.clusterer.is_some() {
                return Err(duplicate());
            }
            self.clusterer = Some(clusterer);
            return Ok(());
        }

        let hotspot_id: HotspotId = key.parse().map_err(|_| RegistryError::InvalidModelKey {
            key: key.to_string(),
            path: path.display().to_string(),
        })?;
        let LoadedModel::Forecaster(forecaster) = model else {
            return Err(RegistryError::WrongModelKind {
                path: path.display().to_string(),
                message: format!("hotspot {hotspot_id} must hold a forecasting model"),
            });
        };
        if self.forecasters.contains_key(&hotspot_id) {
            return Err(duplicate());
        }
        self.forecasters.insert(hotspot_id, forecaster);
        Ok(())
    }
}

/// Immutable snapshot of every city's models.
#[derive(Default)]
pub struct ModelRegistry {
    cities: BTreeMap<String, Arc<CityModels>>,
}

impl ModelRegistry {
    /// Loads every city directory under `root`.
    ///
    /// Any unreadable or undecodable model file aborts the whole load.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if `root` is not a directory or any model
    /// file fails to load.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(RegistryError::NotADirectory(root.display().to_string()));
        }

        log::info!("Loading models from {}", root.display());

        let mut cities = BTreeMap::new();
        for path in sorted_entries(root)? {
            if !path.is_dir() {
                continue;
            }
            let Some(city) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let models = CityModels::load(&city, &path)?;
            cities.insert(city, Arc::new(models));
        }

        log::info!("Loaded models for {} cities", cities.len());

        Ok(Self { cities })
    }

    /// Builds a registry from already constructed city model sets.
    #[must_use]
    pub fn from_cities(cities: impl IntoIterator<Item = CityModels>) -> Self {
        Self {
            cities: cities
                .into_iter()
                .map(|models| (models.city.clone(), Arc::new(models)))
                .collect(),
        }
    }

    /// Models of a city.
    #[must_use]
    pub fn get(&self, city: &str) -> Option<&Arc<CityModels>> {
        self.cities.get(city)
    }

    /// All cities in ascending order.
    pub fn cities(&self) -> impl Iterator<Item = &Arc<CityModels>> {
        self.cities.values()
    }
}

/// Process-wide handle to the current registry snapshot.
pub struct SharedRegistry {
    current: RwLock<Arc<ModelRegistry>>,
}

impl SharedRegistry {
    /// Wraps an initial snapshot.
    #[must_use]
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Returns the current snapshot. The snapshot stays valid after a
    /// reload.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ModelRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the current snapshot.
    pub fn replace(&self, registry: ModelRegistry) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
    }

    /// Loads a fresh registry from `root` and swaps it in. On failure the
    /// current snapshot is kept.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if loading fails.
    pub fn reload(&self, root: impl AsRef<Path>) -> Result<Arc<ModelRegistry>, RegistryError> {
        let registry = ModelRegistry::load(root)?;
        self.replace(registry);
        Ok(self.snapshot())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let io_err = |source| RegistryError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}
