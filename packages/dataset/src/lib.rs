#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CSV loading of raw incident records.
//!
//! This is the validation boundary in front of the forecasting pipeline:
//! every record it returns has a parsed timestamp, and coordinates are
//! either valid numbers or absent. Unparseable rows are rejected with their
//! row number rather than skipped.
//!
//! Recognised columns (extra columns are ignored):
//!
//! | field                  | aliases            |
//! |------------------------|--------------------|
//! | `latitude`             | `lat`              |
//! | `longitude`            | `lon`, `lng`       |
//! | `occurrence_timestamp` | `data_ocorrencia`  |

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use crime_hotspot_incident_models::IncidentRecord;
use serde::Deserialize;

/// Timestamp layouts accepted besides RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Date-only layouts; the time is set to midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Errors from dataset loading.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// CSV structure or field parsing error.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Source of the CSV data.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A row's timestamp could not be parsed.
    #[error("Invalid occurrence timestamp '{value}' in {path} at row {row}")]
    InvalidTimestamp {
        /// Source of the CSV data.
        path: String,
        /// 1-based data row number (header excluded).
        row: u64,
        /// The rejected value.
        value: String,
    },

    /// I/O error reading a directory.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Directory does not exist.
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
}

#[derive(Debug, Deserialize)]
struct CsvIncident {
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lon", alias = "lng")]
    longitude: Option<f64>,
    #[serde(alias = "data_ocorrencia")]
    occurrence_timestamp: String,
}

/// Parses incident records from CSV data with a header row.
///
/// `source` names the data in error messages (a path, or `"upload"`).
///
/// # Errors
///
/// Returns [`DatasetError`] on malformed CSV, unparseable coordinates or
/// unparseable timestamps.
pub fn read_incidents(
    reader: impl Read,
    source: &str,
) -> Result<Vec<IncidentRecord>, DatasetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (idx, result) in csv_reader.deserialize::<CsvIncident>().enumerate() {
        let row = result.map_err(|e| DatasetError::Csv {
            path: source.to_string(),
            source: e,
        })?;

        let occurrence_timestamp =
            parse_timestamp(&row.occurrence_timestamp).ok_or_else(|| {
                DatasetError::InvalidTimestamp {
                    path: source.to_string(),
                    row: idx as u64 + 1,
                    value: row.occurrence_timestamp.clone(),
                }
            })?;

        records.push(IncidentRecord {
            latitude: row.latitude,
            longitude: row.longitude,
            occurrence_timestamp,
        });
    }

    log::debug!("Parsed {} incidents from {source}", records.len());

    Ok(records)
}

/// Reads incident records from a CSV file.
///
/// # Errors
///
/// Returns [`DatasetError`] if the file cannot be opened or parsed.
pub fn read_incidents_file(path: &Path) -> Result<Vec<IncidentRecord>, DatasetError> {
    let file = std::fs::File::open(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_incidents(std::io::BufReader::new(file), &path.display().to_string())
}

/// Loads every `<city>.csv` file in `dir`, keyed by file stem.
///
/// # Errors
///
/// Returns [`DatasetError`] if the directory is missing or any file fails
/// to parse.
pub fn load_city_datasets(
    dir: &Path,
) -> Result<BTreeMap<String, Vec<IncidentRecord>>, DatasetError> {
    if !dir.is_dir() {
        return Err(DatasetError::DirectoryNotFound(dir.display().to_string()));
    }

    let io_err = |source| DatasetError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();

    let mut datasets = BTreeMap::new();
    for path in paths {
        if !path.is_file() || !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            continue;
        }
        let Some(city) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let records = read_incidents_file(&path)?;
        log::info!("Loaded {} incidents for city '{city}'", records.len());
        datasets.insert(city.to_string(), records);
    }

    Ok(datasets)
}

/// Parses an occurrence timestamp in any accepted layout. Offsets in RFC
/// 3339 values are dropped, keeping the local wall-clock time.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
