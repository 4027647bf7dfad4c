//! API error type and its HTTP mapping.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use crime_hotspot_dataset::DatasetError;
use crime_hotspot_pipeline::PipelineError;
use crime_hotspot_registry::RegistryError;

/// Errors returned by API handlers. Rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No models are registered for the city.
    #[error("Unknown city '{0}'")]
    UnknownCity(String),

    /// The city has models but no loaded incident dataset.
    #[error("No incident dataset loaded for city '{0}'")]
    NoDataset(String),

    /// The hotspot id is not a non-negative integer.
    #[error("{0}")]
    InvalidHotspotId(String),

    /// The horizon is outside `1..=max`.
    #[error("Invalid horizon {horizon}: expected 1-{max} days")]
    InvalidHorizon {
        /// Requested horizon.
        horizon: usize,
        /// Largest accepted horizon.
        max: usize,
    },

    /// The uploaded incident CSV could not be parsed.
    #[error("Invalid incident data: {0}")]
    InvalidDataset(#[from] DatasetError),

    /// The forecast pipeline failed.
    #[error(transparent)]
    Pipeline(PipelineError),

    /// Reloading models failed; the previous models stay active.
    #[error("Model reload failed: {0}")]
    Reload(#[from] RegistryError),

    /// A blocking task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownCity(city) => Self::UnknownCity(city),
            other => Self::Pipeline(other),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCity(_) | Self::NoDataset(_) => StatusCode::NOT_FOUND,
            Self::InvalidHotspotId(_) | Self::InvalidHorizon { .. } | Self::InvalidDataset(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Pipeline(PipelineError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Pipeline(PipelineError::UnknownCity(_)) => StatusCode::NOT_FOUND,
            Self::Pipeline(_) | Self::Reload(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{self}");
        } else {
            log::debug!("Rejected request: {self}");
        }
        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::from(PipelineError::UnknownCity("x".to_string())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NoDataset("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PipelineError::MissingClusteringModel {
                city: "x".to_string()
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(PipelineError::Timeout(Duration::from_secs(1))).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::InvalidHorizon { horizon: 0, max: 365 }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
