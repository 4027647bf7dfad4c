#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the hotspot forecast server.
//!
//! [`ApiForecast`] keeps the snake-case field names existing dashboards
//! consume. Everything else follows the camel-case convention of the rest
//! of the API.

use chrono::NaiveDate;
use crime_hotspot_incident_models::{ForecastRow, HotspotId};
use serde::{Deserialize, Serialize};

/// Horizon used when a request does not specify one.
pub const DEFAULT_HORIZON_DAYS: usize = 7;

const fn default_horizon() -> usize {
    DEFAULT_HORIZON_DAYS
}

/// One forecasted day for one hotspot, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiForecast {
    /// Forecasted date (`YYYY-MM-DD`).
    pub ds: NaiveDate,
    /// Point forecast of the daily incident count.
    pub mean_crimes: f64,
    /// Lower bound of the confidence band.
    pub min_crimes: f64,
    /// Upper bound of the confidence band.
    pub max_crimes: f64,
    /// Hotspot the forecast belongs to.
    pub hotspot_id: HotspotId,
    /// Centroid latitude of the hotspot.
    pub latitude: f64,
    /// Centroid longitude of the hotspot.
    pub longitude: f64,
}

impl From<ForecastRow> for ApiForecast {
    fn from(row: ForecastRow) -> Self {
        Self {
            ds: row.date,
            mean_crimes: row.mean_count,
            min_crimes: row.lower_bound,
            max_crimes: row.upper_bound,
            hotspot_id: row.hotspot_id,
            latitude: row.centroid_latitude,
            longitude: row.centroid_longitude,
        }
    }
}

/// Body of `POST /api/forecast`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    /// City whose loaded dataset is forecast.
    pub city: String,
    /// Hotspot to forecast. Dashboards send it as a float (`3.0`).
    pub hotspot_id: f64,
    /// Days to forecast.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
}

/// Body of `POST /api/forecast_all`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastAllRequest {
    /// City whose loaded dataset is forecast.
    pub city: String,
    /// Days to forecast.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
}

/// Query string of `POST /api/cities/{city}/forecast`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HorizonQuery {
    /// Days to forecast.
    #[serde(default = "default_horizon")]
    pub horizon: usize,
}

/// A city known to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCity {
    /// City name.
    pub name: String,
    /// Whether the city has a clustering model.
    pub has_clustering_model: bool,
    /// Number of hotspot forecasting models.
    pub hotspot_models: usize,
    /// Whether an incident dataset is loaded for the city.
    pub has_dataset: bool,
}

/// Result of a model reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReload {
    /// Cities in the new registry.
    pub cities: usize,
    /// Hotspot forecasting models across all cities.
    pub hotspot_models: usize,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}
