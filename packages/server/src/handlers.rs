//! HTTP handler functions for the forecast API.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use crime_hotspot_incident_models::{HotspotId, IncidentRecord};
use crime_hotspot_pipeline::{HotspotSelection, PipelineOutput, city_models, run_concurrent};
use crime_hotspot_server_models::{
    ApiCity, ApiForecast, ApiHealth, ApiReload, ForecastAllRequest, ForecastRequest, HorizonQuery,
};

use crate::AppState;
use crate::config::MAX_HORIZON_DAYS;
use crate::error::ApiError;

/// Response header listing the hotspots whose model failed, comma separated.
pub const FAILED_HOTSPOTS_HEADER: &str = "x-failed-hotspots";

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/cities`
///
/// Lists the cities with registered models.
pub async fn cities(state: web::Data<AppState>) -> HttpResponse {
    let registry = state.registry.snapshot();
    let cities: Vec<ApiCity> = registry
        .cities()
        .map(|models| ApiCity {
            name: models.city().to_string(),
            has_clustering_model: models.clusterer().is_some(),
            hotspot_models: models.forecaster_count(),
            has_dataset: state.datasets.contains_key(models.city()),
        })
        .collect();

    HttpResponse::Ok().json(cities)
}

/// `POST /api/forecast`
///
/// Forecasts one hotspot from the city's loaded dataset.
pub async fn forecast(
    state: web::Data<AppState>,
    body: web::Json<ForecastRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let hotspot_id = HotspotId::try_from(request.hotspot_id)
        .map_err(|e| ApiError::InvalidHotspotId(e.to_string()))?;
    let horizon = validate_horizon(request.horizon)?;

    let records = loaded_dataset(&state, &request.city)?;
    let output = forecast_city(
        &state,
        &request.city,
        records,
        horizon,
        HotspotSelection::Only(hotspot_id),
    )
    .await?;

    Ok(forecast_response(output))
}

/// `POST /api/forecast_all`
///
/// Forecasts every hotspot in the city's loaded dataset.
pub async fn forecast_all(
    state: web::Data<AppState>,
    body: web::Json<ForecastAllRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let horizon = validate_horizon(request.horizon)?;

    let records = loaded_dataset(&state, &request.city)?;
    let output =
        forecast_city(&state, &request.city, records, horizon, HotspotSelection::All).await?;

    Ok(forecast_response(output))
}

/// `POST /api/cities/{city}/forecast`
///
/// Forecasts every hotspot in an uploaded incident CSV.
pub async fn forecast_upload(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HorizonQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let city = path.into_inner();
    let horizon = validate_horizon(query.horizon)?;
    city_models(&state.registry.snapshot(), &city)?;

    let records = tokio::task::spawn_blocking(move || {
        crime_hotspot_dataset::read_incidents(body.as_ref(), "upload")
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    log::debug!("Received {} incidents for '{city}'", records.len());

    let output = forecast_city(
        &state,
        &city,
        Arc::new(records),
        horizon,
        HotspotSelection::All,
    )
    .await?;

    Ok(forecast_response(output))
}

/// `POST /api/models/reload`
///
/// Reloads the model registry from disk. In-flight requests keep the
/// snapshot they started with.
pub async fn reload_models(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let models_dir = state.models_dir.clone();

    let snapshot = tokio::task::spawn_blocking(move || registry.reload(models_dir))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let reload = ApiReload {
        cities: snapshot.cities().count(),
        hotspot_models: snapshot.cities().map(|city| city.forecaster_count()).sum(),
    };
    log::info!(
        "Reloaded models: {} cities, {} hotspot models",
        reload.cities,
        reload.hotspot_models
    );

    Ok(HttpResponse::Ok().json(reload))
}

const fn validate_horizon(horizon: usize) -> Result<usize, ApiError> {
    if horizon == 0 || horizon > MAX_HORIZON_DAYS {
        Err(ApiError::InvalidHorizon {
            horizon,
            max: MAX_HORIZON_DAYS,
        })
    } else {
        Ok(horizon)
    }
}

fn loaded_dataset(state: &AppState, city: &str) -> Result<Arc<Vec<IncidentRecord>>, ApiError> {
    city_models(&state.registry.snapshot(), city)?;
    state
        .datasets
        .get(city)
        .cloned()
        .ok_or_else(|| ApiError::NoDataset(city.to_string()))
}

async fn forecast_city(
    state: &AppState,
    city: &str,
    records: Arc<Vec<IncidentRecord>>,
    horizon: usize,
    selection: HotspotSelection,
) -> Result<PipelineOutput, ApiError> {
    let models = city_models(&state.registry.snapshot(), city)?;
    Ok(run_concurrent(records, horizon, models, selection, state.options.clone()).await?)
}

fn forecast_response(output: PipelineOutput) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    if !output.failures.is_empty() {
        let failed = output
            .failures
            .iter()
            .map(|failure| failure.hotspot_id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        response.insert_header((FAILED_HOTSPOTS_HEADER, failed));
    }

    let rows: Vec<ApiForecast> = output.rows.into_iter().map(ApiForecast::from).collect();
    response.json(rows)
}
