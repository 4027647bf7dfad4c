//! Server configuration from environment variables.

use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crime_hotspot_pipeline::ForecastOptions;

/// Largest horizon a request may ask for.
pub const MAX_HORIZON_DAYS: usize = 365;

/// Runtime configuration of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind (`BIND_ADDR`, default `127.0.0.1`).
    pub bind_addr: String,
    /// Port to bind (`PORT`, default `8080`).
    pub port: u16,
    /// Model registry root (`MODELS_DIR`, default `ml/models`).
    pub models_dir: PathBuf,
    /// Directory of `<city>.csv` incident datasets (`DATA_DIR`, default
    /// `ml/output`).
    pub data_dir: PathBuf,
    /// Pipeline options (`FORECAST_TIMEOUT_SECS`, `FORECAST_WORKERS`,
    /// `FORECAST_MAX_HISTORY`).
    pub options: ForecastOptions,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Unparseable values, and
    /// zero for the pipeline options, fall back to their defaults with a
    /// warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ForecastOptions::default();

        let options = ForecastOptions {
            timeout: parsed::<NonZeroU64>(&lookup, "FORECAST_TIMEOUT_SECS")
                .map_or(defaults.timeout, |secs| Duration::from_secs(secs.get())),
            workers: parsed::<NonZeroUsize>(&lookup, "FORECAST_WORKERS")
                .map_or(defaults.workers, NonZeroUsize::get),
            max_history: parsed(&lookup, "FORECAST_MAX_HISTORY"),
            ..defaults
        };

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed(&lookup, "PORT").unwrap_or(8080),
            models_dir: lookup("MODELS_DIR")
                .map_or_else(|| PathBuf::from("ml/models"), PathBuf::from),
            data_dir: lookup("DATA_DIR")
                .map_or_else(|| PathBuf::from("ml/output"), PathBuf::from),
            options,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    value.trim().parse().map_or_else(
        |_| {
            log::warn!("Ignoring invalid {key}={value}");
            None
        },
        Some,
    )
}
