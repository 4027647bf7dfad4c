#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line hotspot forecasts.
//!
//! `crime_hotspot forecast` runs the forecasting pipeline over an incident
//! CSV and prints the forecast rows as JSON, in the same shape the API
//! server returns. `crime_hotspot models` lists what a model directory
//! contains.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use crime_hotspot_incident_models::HotspotId;
use crime_hotspot_pipeline::{DEFAULT_CONFIDENCE_LEVEL, ForecastOptions, PipelineOutput};
use crime_hotspot_registry::ModelRegistry;
use crime_hotspot_server_models::{ApiForecast, DEFAULT_HORIZON_DAYS};

#[derive(Parser)]
#[command(name = "crime_hotspot", about = "Crime hotspot forecasting tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast daily incident counts per hotspot from an incident CSV
    Forecast {
        /// Model registry root (one directory per city)
        #[arg(long, default_value = "ml/models")]
        models: PathBuf,
        /// City whose models are used
        #[arg(long)]
        city: String,
        /// Incident CSV with latitude, longitude and occurrence timestamp
        #[arg(long)]
        input: PathBuf,
        /// Days to forecast
        #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
        horizon: usize,
        /// Only forecast this hotspot
        #[arg(long)]
        hotspot: Option<u32>,
        /// Most recent days of history passed to each model (at least 1)
        #[arg(long)]
        max_history: Option<NonZeroUsize>,
        /// Confidence level of the forecast band, in percent
        #[arg(long, default_value_t = DEFAULT_CONFIDENCE_LEVEL)]
        level: u8,
    },
    /// List the cities and hotspot models in a model directory
    Models {
        /// Model registry root (one directory per city)
        #[arg(long, default_value = "ml/models")]
        models: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    match cli.command {
        Commands::Forecast {
            models,
            city,
            input,
            horizon,
            hotspot,
            max_history,
            level,
        } => {
            let options = ForecastOptions {
                level,
                max_history,
                ..ForecastOptions::default()
            };
            let output = forecast(
                &models,
                &city,
                &input,
                horizon,
                hotspot.map(HotspotId),
                &options,
            )?;
            report(&output);

            let rows: Vec<ApiForecast> =
                output.rows.into_iter().map(ApiForecast::from).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Models { models } => {
            for line in describe_models(&ModelRegistry::load(&models)?) {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn forecast(
    models_dir: &Path,
    city: &str,
    input: &Path,
    horizon: usize,
    hotspot: Option<HotspotId>,
    options: &ForecastOptions,
) -> Result<PipelineOutput, Box<dyn std::error::Error>> {
    let registry = ModelRegistry::load(models_dir)?;
    let models = crime_hotspot_pipeline::city_models(&registry, city)?;
    let records = crime_hotspot_dataset::read_incidents_file(input)?;

    log::info!(
        "Forecasting {horizon} days for '{city}' from {} incidents",
        records.len()
    );

    let output = match hotspot {
        Some(hotspot_id) => crime_hotspot_pipeline::run_for_hotspot(
            &records, hotspot_id, horizon, &models, options,
        )?,
        None => crime_hotspot_pipeline::run(&records, horizon, &models, options)?,
    };
    Ok(output)
}

fn report(output: &PipelineOutput) {
    for skipped in &output.skipped {
        log::info!("Skipped hotspot {}: {}", skipped.hotspot_id, skipped.reason);
    }
    for failure in &output.failures {
        eprintln!("Hotspot {} failed: {}", failure.hotspot_id, failure.reason);
    }
}

fn describe_models(registry: &ModelRegistry) -> Vec<String> {
    registry
        .cities()
        .map(|models| {
            let hotspots = models
                .hotspot_ids()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "{}\tclustering={}\thotspots={} [{hotspots}]",
                models.city(),
                if models.clusterer().is_some() { "yes" } else { "no" },
                models.forecaster_count(),
            )
        })
        .collect()
}
