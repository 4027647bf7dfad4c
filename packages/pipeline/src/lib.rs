#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hotspot forecasting pipeline.
//!
//! Given a city's raw incidents and its models, the pipeline:
//!
//! 1. assigns every incident with coordinates to a hotspot using the city's
//!    clustering model ([`cluster::assign`]),
//! 2. groups the labeled incidents by hotspot, dropping noise,
//! 3. forecasts each hotspot that has both data and a model
//!    ([`forecast::forecast_hotspot`]),
//! 4. concatenates the rows in ascending hotspot order.
//!
//! Hotspots with data but no model, or a model but no data, are skipped and
//! reported. A model failure only affects its own hotspot.

pub mod aggregate;
pub mod cluster;
pub mod forecast;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crime_hotspot_incident_models::{
    ForecastRow, HotspotId, IncidentRecord, LabeledIncident, SkipReason, SkippedHotspot,
};
use crime_hotspot_inference::{Clusterer, ForecastModel, ModelError};
use crime_hotspot_registry::{CityModels, ModelRegistry};
use futures::StreamExt as _;
use thiserror::Error;

/// Default confidence level of the forecast band, in percent.
pub const DEFAULT_CONFIDENCE_LEVEL: u8 = 95;

/// Default number of hotspot forecasts in flight in [`run_concurrent`].
pub const DEFAULT_WORKERS: usize = 4;

/// Default time budget of a [`run_concurrent`] batch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that fail a whole forecast batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No models are registered for the city.
    #[error("Unknown city '{0}'")]
    UnknownCity(String),

    /// The city has forecasters but no clustering model.
    #[error("City '{city}' has no clustering model")]
    MissingClusteringModel {
        /// City name.
        city: String,
    },

    /// Cluster assignment failed.
    #[error("Cluster assignment failed: {0}")]
    Clustering(#[source] ModelError),

    /// The batch did not finish within its time budget.
    #[error("Forecast batch timed out after {0:?}")]
    Timeout(Duration),

    /// A blocking task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Tuning knobs of a forecast batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastOptions {
    /// Confidence level of the band, in percent (`1..=99`).
    pub level: u8,
    /// Most recent days of history passed to the model. `None` uses all.
    pub max_history: Option<NonZeroUsize>,
    /// Hotspot forecasts in flight at once in [`run_concurrent`].
    pub workers: usize,
    /// Time budget of a whole [`run_concurrent`] batch.
    pub timeout: Duration,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_CONFIDENCE_LEVEL,
            max_history: None,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Which hotspots of a batch to forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotSelection {
    /// Every hotspot found in the data.
    All,
    /// A single hotspot.
    Only(HotspotId),
}

impl HotspotSelection {
    const fn includes(self, hotspot_id: HotspotId) -> bool {
        match self {
            Self::All => true,
            Self::Only(id) => id.value() == hotspot_id.value(),
        }
    }
}

/// A hotspot whose model failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotFailure {
    /// The hotspot.
    pub hotspot_id: HotspotId,
    /// Error message.
    pub reason: String,
}

/// Result of a forecast batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    /// Forecast rows, ascending by hotspot id then date.
    pub rows: Vec<ForecastRow>,
    /// Hotspots left out because data or model was missing.
    pub skipped: Vec<SkippedHotspot>,
    /// Hotspots whose model failed.
    pub failures: Vec<HotspotFailure>,
}

/// Looks up a city's models.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownCity`] if the registry has no entry.
pub fn city_models(registry: &ModelRegistry, city: &str) -> Result<Arc<CityModels>, PipelineError> {
    registry
        .get(city)
        .cloned()
        .ok_or_else(|| PipelineError::UnknownCity(city.to_string()))
}

/// Forecasts every hotspot found in `records`.
///
/// # Errors
///
/// Returns [`PipelineError`] if the city has no clustering model or cluster
/// assignment fails. Per-hotspot model failures are reported in
/// [`PipelineOutput::failures`] instead.
pub fn run(
    records: &[IncidentRecord],
    horizon_days: usize,
    models: &CityModels,
    options: &ForecastOptions,
) -> Result<PipelineOutput, PipelineError> {
    run_selected(records, horizon_days, models, HotspotSelection::All, options)
}

/// Forecasts a single hotspot. Clustering still runs over all of `records`.
///
/// # Errors
///
/// Same as [`run`].
pub fn run_for_hotspot(
    records: &[IncidentRecord],
    hotspot_id: HotspotId,
    horizon_days: usize,
    models: &CityModels,
    options: &ForecastOptions,
) -> Result<PipelineOutput, PipelineError> {
    run_selected(
        records,
        horizon_days,
        models,
        HotspotSelection::Only(hotspot_id),
        options,
    )
}

fn run_selected(
    records: &[IncidentRecord],
    horizon_days: usize,
    models: &CityModels,
    selection: HotspotSelection,
    options: &ForecastOptions,
) -> Result<PipelineOutput, PipelineError> {
    let clusterer = require_clusterer(models)?;
    let labeled = cluster::assign(records, &**clusterer).map_err(PipelineError::Clustering)?;
    let plan = ForecastPlan::build(labeled, models, selection);

    let results = plan
        .jobs
        .into_iter()
        .map(|job| {
            let result = forecast::forecast_hotspot(
                &job.records,
                job.hotspot_id,
                horizon_days,
                &job.model,
                options,
            )
            .map_err(|e| e.to_string());
            (job.hotspot_id, result)
        })
        .collect();

    Ok(assemble(models.city(), results, plan.skipped))
}

/// Async [`run`] for servers.
///
/// Clustering and every hotspot forecast run on the blocking thread pool,
/// with at most [`ForecastOptions::workers`] forecasts in flight. The whole
/// batch is bounded by [`ForecastOptions::timeout`].
///
/// # Errors
///
/// Returns [`PipelineError::Timeout`] if the batch exceeds its budget, or
/// any error [`run`] returns.
pub async fn run_concurrent(
    records: Arc<Vec<IncidentRecord>>,
    horizon_days: usize,
    models: Arc<CityModels>,
    selection: HotspotSelection,
    options: ForecastOptions,
) -> Result<PipelineOutput, PipelineError> {
    let timeout = options.timeout;
    tokio::time::timeout(
        timeout,
        run_batch(records, horizon_days, models, selection, options),
    )
    .await
    .map_err(|_| {
        log::warn!("Forecast batch exceeded {timeout:?}");
        PipelineError::Timeout(timeout)
    })?
}

async fn run_batch(
    records: Arc<Vec<IncidentRecord>>,
    horizon_days: usize,
    models: Arc<CityModels>,
    selection: HotspotSelection,
    options: ForecastOptions,
) -> Result<PipelineOutput, PipelineError> {
    let clusterer = Arc::clone(require_clusterer(&models)?);
    let labeled = tokio::task::spawn_blocking(move || cluster::assign(&records, &*clusterer))
        .await?
        .map_err(PipelineError::Clustering)?;

    let plan = ForecastPlan::build(labeled, &models, selection);
    let workers = options.workers.max(1);
    let options = Arc::new(options);

    log::debug!(
        "Forecasting {} hotspots for '{}' with {workers} workers",
        plan.jobs.len(),
        models.city()
    );

    let results = futures::stream::iter(plan.jobs.into_iter().map(|job| {
        let options = Arc::clone(&options);
        async move {
            let hotspot_id = job.hotspot_id;
            let result = tokio::task::spawn_blocking(move || {
                forecast::forecast_hotspot(
                    &job.records,
                    job.hotspot_id,
                    horizon_days,
                    &job.model,
                    &options,
                )
            })
            .await;
            let result = match result {
                Ok(forecast) => forecast.map_err(|e| e.to_string()),
                Err(e) => Err(format!("forecast task failed: {e}")),
            };
            (hotspot_id, result)
        }
    }))
    .buffer_unordered(workers)
    .collect::<Vec<_>>()
    .await;

    Ok(assemble(models.city(), results, plan.skipped))
}

fn require_clusterer(models: &CityModels) -> Result<&Arc<dyn Clusterer>, PipelineError> {
    models
        .clusterer()
        .ok_or_else(|| PipelineError::MissingClusteringModel {
            city: models.city().to_string(),
        })
}

struct ForecastJob {
    hotspot_id: HotspotId,
    records: Vec<IncidentRecord>,
    model: ForecastModel,
}

/// Hotspots matched against the registry, before any model runs.
struct ForecastPlan {
    jobs: Vec<ForecastJob>,
    skipped: Vec<SkippedHotspot>,
}

impl ForecastPlan {
    fn build(
        labeled: Vec<LabeledIncident>,
        models: &CityModels,
        selection: HotspotSelection,
    ) -> Self {
        let mut by_hotspot: BTreeMap<HotspotId, Vec<IncidentRecord>> = BTreeMap::new();
        for incident in labeled {
            if let Some(hotspot_id) = incident.hotspot_id()
                && selection.includes(hotspot_id)
            {
                by_hotspot.entry(hotspot_id).or_default().push(incident.record);
            }
        }

        let mut skipped: Vec<SkippedHotspot> = models
            .hotspot_ids()
            .filter(|id| selection.includes(*id) && !by_hotspot.contains_key(id))
            .map(|hotspot_id| SkippedHotspot {
                hotspot_id,
                reason: SkipReason::NoData,
            })
            .collect();

        let mut jobs = Vec::with_capacity(by_hotspot.len());
        for (hotspot_id, records) in by_hotspot {
            if let Some(model) = models.forecaster(hotspot_id) {
                jobs.push(ForecastJob {
                    hotspot_id,
                    records,
                    model: model.clone(),
                });
            } else {
                skipped.push(SkippedHotspot {
                    hotspot_id,
                    reason: SkipReason::NoModel,
                });
            }
        }
        skipped.sort_by_key(|s| s.hotspot_id);
        for skip in &skipped {
            log::debug!(
                "Skipping hotspot {} of '{}': {}",
                skip.hotspot_id,
                models.city(),
                skip.reason
            );
        }

        Self { jobs, skipped }
    }
}

fn assemble(
    city: &str,
    mut results: Vec<(HotspotId, Result<Vec<ForecastRow>, String>)>,
    skipped: Vec<SkippedHotspot>,
) -> PipelineOutput {
    results.sort_by_key(|(hotspot_id, _)| *hotspot_id);

    let mut output = PipelineOutput {
        skipped,
        ..PipelineOutput::default()
    };
    for (hotspot_id, result) in results {
        match result {
            Ok(rows) => output.rows.extend(rows),
            Err(reason) => {
                log::warn!("Forecast failed for hotspot {hotspot_id} of '{city}': {reason}");
                output.failures.push(HotspotFailure { hotspot_id, reason });
            }
        }
    }

    log::info!(
        "Forecast for '{city}': {} rows, {} skipped, {} failed",
        output.rows.len(),
        output.skipped.len(),
        output.failures.len()
    );

    output
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::NaiveDate;
    use crime_hotspot_incident_models::IncidentRecord;
    use crime_hotspot_inference::{Clusterer, ForecastModel, Forecaster, ModelError, RawForecast};

    /// An incident at noon on `date` (`YYYY-MM-DD`).
    pub fn incident(latitude: f64, longitude: f64, date: &str) -> IncidentRecord {
        let timestamp = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        IncidentRecord::new(latitude, longitude, timestamp)
    }

    /// Returns the given labels regardless of the points.
    pub struct FixedLabels(pub Vec<Option<i64>>);

    impl Clusterer for FixedLabels {
        fn predict_labels(&self, _points: &[[f64; 2]]) -> Result<Vec<Option<i64>>, ModelError> {
            Ok(self.0.clone())
        }
    }

    /// Labels each point with its longitude in whole degrees; negative
    /// longitudes are noise.
    pub struct ByLongitude;

    impl Clusterer for ByLongitude {
        #[allow(clippy::cast_possible_truncation)]
        fn predict_labels(&self, points: &[[f64; 2]]) -> Result<Vec<Option<i64>>, ModelError> {
            Ok(points
                .iter()
                .map(|[_, lon]| Some(lon.to_degrees().round() as i64))
                .collect())
        }
    }

    /// Forecasts the same triple for every step.
    pub struct Constant {
        pub mean: f64,
        pub lower: f64,
        pub upper: f64,
    }

    impl Forecaster for Constant {
        fn family(&self) -> &str {
            "Constant"
        }

        fn predict(
            &self,
            _history: &[f64],
            horizon: usize,
            level: u8,
        ) -> Result<RawForecast, ModelError> {
            let mut raw = RawForecast::default();
            raw.insert("Constant", vec![self.mean; horizon]);
            raw.insert(format!("Constant-lo-{level}"), vec![self.lower; horizon]);
            raw.insert(format!("Constant-hi-{level}"), vec![self.upper; horizon]);
            Ok(raw)
        }
    }

    pub fn constant_model(forecaster: Constant) -> ForecastModel {
        ForecastModel::new(Arc::new(forecaster))
    }

    /// Records every history it is given and forecasts zeros.
    #[derive(Default)]
    pub struct Recording {
        histories: Mutex<Vec<Vec<f64>>>,
    }

    impl Recording {
        pub fn histories(&self) -> Vec<Vec<f64>> {
            self.histories.lock().unwrap().clone()
        }
    }

    impl Forecaster for Recording {
        fn family(&self) -> &str {
            "Constant"
        }

        fn predict(
            &self,
            history: &[f64],
            horizon: usize,
            level: u8,
        ) -> Result<RawForecast, ModelError> {
            self.histories.lock().unwrap().push(history.to_vec());
            Constant {
                mean: 0.0,
                lower: 0.0,
                upper: 0.0,
            }
            .predict(history, horizon, level)
        }
    }

    /// Always fails.
    pub struct Failing;

    impl Forecaster for Failing {
        fn family(&self) -> &str {
            "Failing"
        }

        fn predict(&self, _: &[f64], _: usize, _: u8) -> Result<RawForecast, ModelError> {
            Err(ModelError::InvalidParameters {
                message: "model is broken".to_string(),
            })
        }
    }

    /// Sleeps before forecasting zeros.
    pub struct Slow(pub Duration);

    impl Forecaster for Slow {
        fn family(&self) -> &str {
            "Constant"
        }

        fn predict(
            &self,
            history: &[f64],
            horizon: usize,
            level: u8,
        ) -> Result<RawForecast, ModelError> {
            std::thread::sleep(self.0);
            Constant {
                mean: 0.0,
                lower: 0.0,
                upper: 0.0,
            }
            .predict(history, horizon, level)
        }
    }
}
