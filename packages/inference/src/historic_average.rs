//! Historic-average baseline: the mean of the history with a normal band
//! from its sample standard deviation.

use crate::quantile::z_score;
use crate::{Forecaster, ModelError, RawForecast};

/// Family name and raw output prefix.
pub const FAMILY: &str = "HistoricAverage";

/// Historic-average forecaster. It has no fitted parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricAverage;

impl Forecaster for HistoricAverage {
    fn family(&self) -> &str {
        FAMILY
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(
        &self,
        history: &[f64],
        horizon: usize,
        level: u8,
    ) -> Result<RawForecast, ModelError> {
        if history.is_empty() {
            return Err(ModelError::InsufficientHistory { needed: 1, got: 0 });
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let std = if history.len() > 1 {
            (history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        let half_width = z_score(level) * std * (1.0 + 1.0 / n).sqrt();

        let mut raw = RawForecast::default();
        raw.insert(FAMILY, vec![mean; horizon]);
        raw.insert(format!("{FAMILY}-lo-{level}"), vec![mean - half_width; horizon]);
        raw.insert(format!("{FAMILY}-hi-{level}"), vec![mean + half_width; horizon]);
        Ok(raw)
    }
}
