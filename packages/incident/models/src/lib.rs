#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident, hotspot and forecast row types.
//!
//! These are the canonical in-process types of the hotspot forecasting
//! pipeline. Hotspot identifiers are always [`HotspotId`] inside the
//! pipeline; they are only turned into strings at the model registry key
//! boundary and into JSON numbers at the API boundary.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// A single raw crime incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    /// Latitude in degrees, if the source provided one.
    pub latitude: Option<f64>,
    /// Longitude in degrees, if the source provided one.
    pub longitude: Option<f64>,
    /// When the incident occurred.
    pub occurrence_timestamp: NaiveDateTime,
}

impl IncidentRecord {
    /// Creates a record with both coordinates present.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, occurrence_timestamp: NaiveDateTime) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            occurrence_timestamp,
        }
    }

    /// Returns `(latitude, longitude)` when both are present and finite.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Calendar date the incident occurred on.
    #[must_use]
    pub fn occurrence_date(&self) -> NaiveDate {
        self.occurrence_timestamp.date()
    }
}

/// Identifier of a hotspot produced by the clustering model.
///
/// The string form (`"3"`) is the registry key for the hotspot's
/// forecasting model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HotspotId(pub u32);

impl HotspotId {
    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for HotspotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HotspotId {
    type Err = InvalidHotspotIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| InvalidHotspotIdError {
                value: s.to_string(),
            })
    }
}

impl TryFrom<f64> for HotspotId {
    type Error = InvalidHotspotIdError;

    /// Accepts integral, non-negative values such as `3.0`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_finite() && value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value)
        {
            Ok(Self(value as u32))
        } else {
            Err(InvalidHotspotIdError {
                value: value.to_string(),
            })
        }
    }
}

/// Error returned when a value cannot be used as a [`HotspotId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidHotspotIdError {
    /// The rejected value.
    pub value: String,
}

impl std::fmt::Display for InvalidHotspotIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid hotspot id '{}': expected a non-negative integer",
            self.value
        )
    }
}

impl std::error::Error for InvalidHotspotIdError {}

/// Cluster label assigned to a single incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HotspotLabel {
    /// Not part of any cluster.
    Noise,
    /// Member of a hotspot.
    Hotspot(HotspotId),
}

impl HotspotLabel {
    /// Converts a raw clustering label. Null and negative labels (the
    /// clustering model uses `-1`) are noise.
    ///
    /// # Errors
    ///
    /// Returns an error if the label does not fit in a [`HotspotId`].
    pub fn from_raw(raw: Option<i64>) -> Result<Self, InvalidHotspotIdError> {
        match raw {
            None => Ok(Self::Noise),
            Some(value) if value < 0 => Ok(Self::Noise),
            Some(value) => u32::try_from(value)
                .map(|id| Self::Hotspot(HotspotId(id)))
                .map_err(|_| InvalidHotspotIdError {
                    value: value.to_string(),
                }),
        }
    }

    /// Returns the hotspot id, or `None` for noise.
    #[must_use]
    pub const fn hotspot_id(self) -> Option<HotspotId> {
        match self {
            Self::Noise => None,
            Self::Hotspot(id) => Some(id),
        }
    }
}

/// An incident paired with its cluster label.
///
/// `label` is `None` for incidents that were never clustered because they
/// had no usable coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledIncident {
    /// The original incident.
    pub record: IncidentRecord,
    /// Assigned cluster label.
    pub label: Option<HotspotLabel>,
}

impl LabeledIncident {
    /// Hotspot the incident belongs to, if any.
    #[must_use]
    pub fn hotspot_id(&self) -> Option<HotspotId> {
        self.label.and_then(HotspotLabel::hotspot_id)
    }
}

/// Number of incidents on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    /// Calendar date.
    pub date: NaiveDate,
    /// Incidents on that date.
    pub count: u64,
}

/// One forecasted day for one hotspot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRow {
    /// Forecasted date.
    pub date: NaiveDate,
    /// Point forecast of the incident count.
    pub mean_count: f64,
    /// Lower bound of the confidence band.
    pub lower_bound: f64,
    /// Upper bound of the confidence band.
    pub upper_bound: f64,
    /// Hotspot the forecast belongs to.
    pub hotspot_id: HotspotId,
    /// Mean latitude of the hotspot's historical incidents.
    pub centroid_latitude: f64,
    /// Mean longitude of the hotspot's historical incidents.
    pub centroid_longitude: f64,
}

/// Why a hotspot produced no forecast rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// Clustered incidents exist but the registry has no model.
    NoModel,
    /// The registry has a model but no incident was clustered into it.
    NoData,
}

/// A hotspot left out of a forecast batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedHotspot {
    /// The hotspot.
    pub hotspot_id: HotspotId,
    /// Why it was skipped.
    pub reason: SkipReason,
}
