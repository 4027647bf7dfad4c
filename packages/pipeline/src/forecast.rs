//! Forecast for a single hotspot.

use crime_hotspot_incident_models::{ForecastRow, HotspotId, IncidentRecord};
use crime_hotspot_inference::{ForecastModel, ModelError};
use geo::{Centroid as _, MultiPoint, Point};

use crate::ForecastOptions;
use crate::aggregate::{cap_history, daily_counts};

/// Forecasts `horizon_days` days for one hotspot from its incidents.
///
/// The history is the hotspot's daily incident count, capped to the most
/// recent [`ForecastOptions::max_history`] days. Forecast dates start the
/// day after the last observed date. Every row carries the centroid of all
/// `records` that have coordinates.
///
/// Non-finite model outputs are replaced by `0.0` and the bounds are then
/// clamped around the mean, so every row satisfies
/// `lower_bound <= mean_count <= upper_bound`.
///
/// An empty `records` slice yields no rows and the model is not called.
///
/// # Errors
///
/// Returns [`ModelError`] if the model fails.
pub fn forecast_hotspot(
    records: &[IncidentRecord],
    hotspot_id: HotspotId,
    horizon_days: usize,
    model: &ForecastModel,
    options: &ForecastOptions,
) -> Result<Vec<ForecastRow>, ModelError> {
    let counts = daily_counts(records);
    let history = cap_history(&counts, options.max_history);

    let Some(last) = history.last() else {
        log::debug!("Hotspot {hotspot_id} has no history, skipping forecast");
        return Ok(Vec::new());
    };
    if horizon_days == 0 {
        return Ok(Vec::new());
    }

    #[allow(clippy::cast_precision_loss)]
    let series: Vec<f64> = history.iter().map(|day| day.count as f64).collect();

    log::debug!(
        "Forecasting hotspot {hotspot_id} with {} ({} days of history, horizon {horizon_days})",
        model.family(),
        series.len()
    );

    let forecast = model.forecast(&series, horizon_days, options.level)?;

    let (latitude, longitude) = centroid(records).unwrap_or((0.0, 0.0));
    let centroid_latitude = finite_or_zero(latitude);
    let centroid_longitude = finite_or_zero(longitude);

    Ok(last
        .date
        .iter_days()
        .skip(1)
        .zip(forecast.mean.iter().zip(&forecast.lower).zip(&forecast.upper))
        .map(|(date, ((&mean, &lower), &upper))| {
            let (mean_count, lower_bound, upper_bound) = sanitize_band(mean, lower, upper);
            ForecastRow {
                date,
                mean_count,
                lower_bound,
                upper_bound,
                hotspot_id,
                centroid_latitude,
                centroid_longitude,
            }
        })
        .collect())
}

/// Mean `(latitude, longitude)` of the records that have coordinates.
#[must_use]
pub fn centroid(records: &[IncidentRecord]) -> Option<(f64, f64)> {
    let points: MultiPoint<f64> = records
        .iter()
        .filter_map(IncidentRecord::coordinates)
        .map(|(lat, lon)| Point::new(lon, lat))
        .collect();
    points.centroid().map(|point| (point.y(), point.x()))
}

const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn sanitize_band(mean: f64, lower: f64, upper: f64) -> (f64, f64, f64) {
    let mean = finite_or_zero(mean);
    (
        mean,
        finite_or_zero(lower).min(mean),
        finite_or_zero(upper).max(mean),
    )
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use crime_hotspot_inference::historic_average::HistoricAverage;

    use super::*;
    use crate::test_support::{Constant, Recording, constant_model, incident};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    fn sao_paulo_hotspot() -> Vec<IncidentRecord> {
        vec![
            incident(-23.550, -46.630, "2025-01-01"),
            incident(-23.551, -46.631, "2025-01-01"),
            incident(-23.549, -46.629, "2025-01-01"),
            incident(-23.552, -46.632, "2025-01-02"),
            incident(-23.548, -46.628, "2025-01-02"),
        ]
    }

    #[test]
    fn forecasts_days_after_last_observation() {
        let model = ForecastModel::new(Arc::new(HistoricAverage));
        let rows = forecast_hotspot(
            &sao_paulo_hotspot(),
            HotspotId(7),
            2,
            &model,
            &ForecastOptions::default(),
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date("2025-01-03"));
        assert_eq!(rows[1].date, date("2025-01-04"));
        for row in &rows {
            assert_eq!(row.hotspot_id, HotspotId(7));
            assert!(row.mean_count.is_finite());
            assert!((row.mean_count - 2.5).abs() < 1e-12);
            assert!((row.centroid_latitude - -23.55).abs() < 1e-9);
            assert!((row.centroid_longitude - -46.63).abs() < 1e-9);
        }
    }

    #[test]
    fn centroid_is_mean_of_coordinates() {
        let mut records = vec![
            incident(10.0, 20.0, "2025-01-01"),
            incident(12.0, 26.0, "2025-01-01"),
        ];
        let mut missing = incident(0.0, 0.0, "2025-01-01");
        missing.latitude = None;
        records.push(missing);

        let (lat, lon) = centroid(&records).unwrap();
        assert!((lat - 11.0).abs() < 1e-12);
        assert!((lon - 23.0).abs() < 1e-12);
        assert_eq!(centroid(&[]), None);
    }

    #[test]
    fn infinite_output_becomes_zero() {
        let model = constant_model(Constant {
            mean: f64::INFINITY,
            lower: f64::NEG_INFINITY,
            upper: f64::NAN,
        });
        let rows = forecast_hotspot(
            &sao_paulo_hotspot(),
            HotspotId(1),
            3,
            &model,
            &ForecastOptions::default(),
        )
        .unwrap();

        assert_eq!(rows.len(), 3);
        for row in rows {
            assert!(row.mean_count.abs() < f64::EPSILON);
            assert!(!row.lower_bound.is_nan() && !row.upper_bound.is_nan());
        }
    }

    #[test]
    fn bounds_are_clamped_around_mean() {
        for (mean, lower, upper) in [
            (5.0, 6.0, 4.0),
            (f64::NAN, 1.0, 2.0),
            (3.0, f64::NAN, f64::INFINITY),
        ] {
            let model = constant_model(Constant { mean, lower, upper });
            let rows = forecast_hotspot(
                &sao_paulo_hotspot(),
                HotspotId(1),
                1,
                &model,
                &ForecastOptions::default(),
            )
            .unwrap();
            let row = &rows[0];
            assert!(row.lower_bound <= row.mean_count, "{row:?}");
            assert!(row.mean_count <= row.upper_bound, "{row:?}");
        }
    }

    #[test]
    fn empty_history_does_not_call_the_model() {
        let recording = Arc::new(Recording::default());
        let model = ForecastModel::new(recording.clone());

        let rows =
            forecast_hotspot(&[], HotspotId(1), 7, &model, &ForecastOptions::default()).unwrap();

        assert!(rows.is_empty());
        assert!(recording.histories().is_empty());
    }

    #[test]
    fn horizon_zero_yields_no_rows() {
        let model = ForecastModel::new(Arc::new(HistoricAverage));
        let rows = forecast_hotspot(
            &sao_paulo_hotspot(),
            HotspotId(1),
            0,
            &model,
            &ForecastOptions::default(),
        )
        .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn horizon_sets_row_count() {
        let model = ForecastModel::new(Arc::new(HistoricAverage));
        for horizon in [1, 7, 30] {
            let rows = forecast_hotspot(
                &sao_paulo_hotspot(),
                HotspotId(1),
                horizon,
                &model,
                &ForecastOptions::default(),
            )
            .unwrap();
            assert_eq!(rows.len(), horizon);
            assert_eq!(
                rows[horizon - 1].date,
                date("2025-01-02") + chrono::Days::new(horizon as u64)
            );
        }
    }

    #[test]
    fn history_cap_keeps_recent_days() {
        let recording = Arc::new(Recording::default());
        let model = ForecastModel::new(recording.clone());
        let options = ForecastOptions {
            max_history: NonZeroUsize::new(1),
            ..ForecastOptions::default()
        };

        forecast_hotspot(&sao_paulo_hotspot(), HotspotId(1), 1, &model, &options).unwrap();

        assert_eq!(recording.histories(), vec![vec![2.0]]);
    }

    #[test]
    fn model_errors_propagate() {
        let model = ForecastModel::new(Arc::new(HistoricAverage));
        let options = ForecastOptions {
            level: 100,
            ..ForecastOptions::default()
        };
        assert!(matches!(
            forecast_hotspot(&sao_paulo_hotspot(), HotspotId(1), 1, &model, &options),
            Err(ModelError::InvalidLevel(100))
        ));
    }
}
