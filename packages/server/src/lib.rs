#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for crime hotspot forecasts.
//!
//! Models are loaded once at startup from `MODELS_DIR` and can be swapped
//! at runtime through `POST /api/models/reload`. Per-city incident datasets
//! are loaded once from `DATA_DIR`. Forecasts run on the blocking thread
//! pool with a bounded number of hotspots in flight and a per-request
//! timeout.

pub mod config;
pub mod error;
mod handlers;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use crime_hotspot_dataset::DatasetError;
use crime_hotspot_incident_models::IncidentRecord;
use crime_hotspot_pipeline::ForecastOptions;
use crime_hotspot_registry::{ModelRegistry, SharedRegistry};

pub use config::ServerConfig;
pub use handlers::FAILED_HOTSPOTS_HEADER;

/// Largest accepted CSV upload.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    /// Current model registry.
    pub registry: Arc<SharedRegistry>,
    /// Incident datasets by city, loaded at startup.
    pub datasets: BTreeMap<String, Arc<Vec<IncidentRecord>>>,
    /// Directory the registry reloads from.
    pub models_dir: PathBuf,
    /// Pipeline options for every request.
    pub options: ForecastOptions,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES)).service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/cities", web::get().to(handlers::cities))
            .route("/forecast", web::post().to(handlers::forecast))
            .route("/forecast_all", web::post().to(handlers::forecast_all))
            .route(
                "/cities/{city}/forecast",
                web::post().to(handlers::forecast_upload),
            )
            .route("/models/reload", web::post().to(handlers::reload_models)),
    );
}

/// Loads the per-city datasets in `dir`. A missing directory yields no
/// datasets.
///
/// # Errors
///
/// Returns [`DatasetError`] if a dataset file cannot be read or parsed.
pub fn load_datasets(
    dir: &Path,
) -> Result<BTreeMap<String, Arc<Vec<IncidentRecord>>>, DatasetError> {
    match crime_hotspot_dataset::load_city_datasets(dir) {
        Ok(datasets) => Ok(datasets
            .into_iter()
            .map(|(city, records)| (city, Arc::new(records)))
            .collect()),
        Err(DatasetError::DirectoryNotFound(path)) => {
            log::warn!("Dataset directory {path} not found; only uploads can be forecast");
            Ok(BTreeMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Starts the forecast API server.
///
/// Reads [`ServerConfig`] from the environment, loads the model registry
/// and the city datasets, and starts the Actix-Web HTTP server. The caller
/// provides the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the model registry or a dataset fails to load.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env();
    log::debug!("Server configuration: {config:?}");

    let registry = ModelRegistry::load(&config.models_dir).expect("Failed to load models");

    log::info!("Loading datasets from {}...", config.data_dir.display());
    let datasets = load_datasets(&config.data_dir).expect("Failed to load datasets");

    let state = web::Data::new(AppState {
        registry: Arc::new(SharedRegistry::new(registry)),
        datasets,
        models_dir: config.models_dir,
        options: config.options,
    });

    let ServerConfig {
        bind_addr, port, ..
    } = config;

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::http::header::HeaderMap;
    use actix_web::test::{TestRequest, call_service, init_service, read_body};
    use crime_hotspot_incident_models::HotspotId;
    use crime_hotspot_inference::ForecastModel;
    use crime_hotspot_inference::arima::{Arima, ArimaParams};
    use crime_hotspot_inference::exemplar::{Exemplar, ExemplarClusterer, ExemplarParams};
    use crime_hotspot_inference::historic_average::HistoricAverage;
    use crime_hotspot_registry::CityModels;

    use super::*;

    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    const SAO_PAULO_CSV: &str = "latitude,longitude,occurrence_timestamp\n\
        -23.550,-46.630,2025-01-01 08:00:00\n\
        -23.551,-46.631,2025-01-01 12:30:00\n\
        -23.549,-46.629,2025-01-01 22:10:00\n\
        -23.552,-46.632,2025-01-02 09:00:00\n\
        -23.548,-46.628,2025-01-02 18:45:00\n\
        -22.906,-43.172,2025-01-02 18:45:00\n";

    fn exemplar(lat: f64, lon: f64, label: i64) -> Exemplar {
        Exemplar {
            latitude: lat.to_radians(),
            longitude: lon.to_radians(),
            label,
            core_distance: 0.0,
        }
    }

    fn sao_paulo_models() -> CityModels {
        let clusterer = ExemplarClusterer::new(ExemplarParams {
            exemplars: vec![
                exemplar(-23.550, -46.630, 7),
                exemplar(-23.700, -46.800, 3),
            ],
            max_reachability: 1_000.0 / EARTH_RADIUS_M,
        })
        .unwrap();

        CityModels::new("sao_paulo")
            .with_clusterer(Arc::new(clusterer))
            .with_forecaster(HotspotId(7), ForecastModel::new(Arc::new(HistoricAverage)))
    }

    fn state(models: Vec<CityModels>, models_dir: PathBuf) -> web::Data<AppState> {
        let records =
            crime_hotspot_dataset::read_incidents(SAO_PAULO_CSV.as_bytes(), "test").unwrap();
        web::Data::new(AppState {
            registry: Arc::new(SharedRegistry::new(ModelRegistry::from_cities(models))),
            datasets: BTreeMap::from([("sao_paulo".to_string(), Arc::new(records))]),
            models_dir,
            options: ForecastOptions::default(),
        })
    }

    fn default_state() -> web::Data<AppState> {
        state(
            vec![sao_paulo_models(), CityModels::new("recife")],
            PathBuf::from("missing"),
        )
    }

    async fn send(
        state: web::Data<AppState>,
        req: TestRequest,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let app = init_service(App::new().app_data(state).configure(configure)).await;
        let resp = call_service(&app, req.to_request()).await;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = read_body(resp).await;
        (
            status,
            headers,
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        )
    }

    fn dates(body: &serde_json::Value) -> Vec<&str> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|row| row["ds"].as_str().unwrap())
            .collect()
    }

    #[actix_web::test]
    async fn health() {
        let (status, _, body) =
            send(default_state(), TestRequest::get().uri("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
    }

    #[actix_web::test]
    async fn lists_cities() {
        let (status, _, body) =
            send(default_state(), TestRequest::get().uri("/api/cities")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!([
                {
                    "name": "recife",
                    "hasClusteringModel": false,
                    "hotspotModels": 0,
                    "hasDataset": false
                },
                {
                    "name": "sao_paulo",
                    "hasClusteringModel": true,
                    "hotspotModels": 1,
                    "hasDataset": true
                },
            ])
        );
    }

    #[actix_web::test]
    async fn forecast_all_for_loaded_dataset() {
        let (status, headers, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast_all")
                .set_json(serde_json::json!({"city": "sao_paulo", "horizon": 2})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(FAILED_HOTSPOTS_HEADER).is_none());
        assert_eq!(dates(&body), vec!["2025-01-03", "2025-01-04"]);

        let row = &body[0];
        assert_eq!(row["hotspot_id"], 7);
        assert!((row["mean_crimes"].as_f64().unwrap() - 2.5).abs() < 1e-9);
        assert!(row["min_crimes"].as_f64().unwrap() <= row["mean_crimes"].as_f64().unwrap());
        assert!(row["max_crimes"].as_f64().unwrap() >= row["mean_crimes"].as_f64().unwrap());
        assert!((row["latitude"].as_f64().unwrap() - -23.55).abs() < 1e-9);
        assert!((row["longitude"].as_f64().unwrap() - -46.63).abs() < 1e-9);
    }

    #[actix_web::test]
    async fn forecast_single_hotspot_with_float_id() {
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast")
                .set_json(serde_json::json!({"city": "sao_paulo", "hotspot_id": 7.0})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 7);

        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast")
                .set_json(serde_json::json!({"city": "sao_paulo", "hotspot_id": 3.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[actix_web::test]
    async fn fractional_hotspot_id_is_rejected() {
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast")
                .set_json(serde_json::json!({"city": "sao_paulo", "hotspot_id": 7.5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("7.5"));
    }

    #[actix_web::test]
    async fn invalid_horizon_is_rejected() {
        for horizon in [0, config::MAX_HORIZON_DAYS + 1] {
            let (status, _, _) = send(
                default_state(),
                TestRequest::post()
                    .uri("/api/forecast_all")
                    .set_json(serde_json::json!({"city": "sao_paulo", "horizon": horizon})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn unknown_city_is_not_found() {
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast_all")
                .set_json(serde_json::json!({"city": "atlantis"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Unknown city 'atlantis'");
    }

    #[actix_web::test]
    async fn city_without_dataset_is_not_found() {
        let (status, _, _) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/forecast_all")
                .set_json(serde_json::json!({"city": "recife"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn missing_clustering_model_is_a_server_error() {
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/cities/recife/forecast")
                .insert_header(("content-type", "text/csv"))
                .set_payload(SAO_PAULO_CSV),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("clustering"));
    }

    #[actix_web::test]
    async fn forecast_uploaded_csv() {
        let csv = "lat,lng,data_ocorrencia\n\
                   -23.550,-46.630,2025-03-10\n\
                   -23.551,-46.631,2025-03-11\n";
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/cities/sao_paulo/forecast?horizon=3")
                .insert_header(("content-type", "text/csv"))
                .set_payload(csv),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(dates(&body), vec!["2025-03-12", "2025-03-13", "2025-03-14"]);
    }

    #[actix_web::test]
    async fn malformed_upload_is_rejected() {
        let (status, _, body) = send(
            default_state(),
            TestRequest::post()
                .uri("/api/cities/sao_paulo/forecast")
                .set_payload("latitude,longitude,occurrence_timestamp\n1.0,2.0,soon\n"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("soon"));
    }

    #[actix_web::test]
    async fn failed_hotspots_are_reported_in_header() {
        // Two days of history cannot be differenced twice and forecast.
        let failing = ForecastModel::new(Arc::new(
            Arima::new(ArimaParams {
                ar: vec![],
                ma: vec![],
                d: 2,
                constant: 0.0,
                sigma2: 1.0,
            })
            .unwrap(),
        ));
        let models = sao_paulo_models().with_forecaster(HotspotId(7), failing);

        let (status, headers, body) = send(
            state(vec![models], PathBuf::from("missing")),
            TestRequest::post()
                .uri("/api/forecast_all")
                .set_json(serde_json::json!({"city": "sao_paulo"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
        assert_eq!(headers.get(FAILED_HOTSPOTS_HEADER).unwrap(), "7");
    }

    #[actix_web::test]
    async fn reload_swaps_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("curitiba")).unwrap();
        std::fs::write(
            dir.path().join("curitiba").join("1_historic.json"),
            r#"{"family": "historic_average"}"#,
        )
        .unwrap();

        let state = state(vec![sao_paulo_models()], dir.path().to_path_buf());
        let (status, _, body) =
            send(state.clone(), TestRequest::post().uri("/api/models/reload")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"cities": 1, "hotspotModels": 1}));
        let names: Vec<_> = state
            .registry
            .snapshot()
            .cities()
            .map(|city| city.city().to_string())
            .collect();
        assert_eq!(names, vec!["curitiba"]);
    }

    #[actix_web::test]
    async fn failed_reload_keeps_current_models() {
        let state = default_state();
        let (status, _, _) =
            send(state.clone(), TestRequest::post().uri("/api/models/reload")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(state.registry.snapshot().get("sao_paulo").is_some());
    }

    #[test]
    fn missing_dataset_directory_is_empty() {
        let datasets = load_datasets(Path::new("does/not/exist")).unwrap();
        assert!(datasets.is_empty());
    }
}
