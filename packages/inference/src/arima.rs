//! Fitted ARIMA(p, d, q) forecaster.
//!
//! The coefficients come from an offline AutoARIMA fit. At inference time
//! the model is conditioned on the supplied history:
//!
//! 1. the history is differenced `d` times,
//! 2. in-sample residuals are recovered with the conditional-sum-of-squares
//!    recursion (pre-sample values and errors are zero),
//! 3. point forecasts are produced recursively and integrated back,
//! 4. the prediction interval uses the psi-weights of the integrated
//!    process: `var(h) = sigma2 * sum(psi[j]^2 for j < h)`.

use serde::{Deserialize, Serialize};

use crate::quantile::z_score;
use crate::{Forecaster, ModelError, RawForecast};

/// Family name and raw output prefix.
pub const FAMILY: &str = "AutoARIMA";

/// Largest supported differencing order.
const MAX_DIFFERENCING: usize = 2;

/// Fitted ARIMA parameters as stored in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaParams {
    /// Autoregressive coefficients `phi_1..phi_p`.
    #[serde(default)]
    pub ar: Vec<f64>,
    /// Moving-average coefficients `theta_1..theta_q`.
    #[serde(default)]
    pub ma: Vec<f64>,
    /// Differencing order.
    #[serde(default)]
    pub d: usize,
    /// Constant of the differenced series.
    #[serde(default)]
    pub constant: f64,
    /// Innovation variance.
    pub sigma2: f64,
}

/// ARIMA forecaster built from [`ArimaParams`].
#[derive(Debug, Clone)]
pub struct Arima {
    params: ArimaParams,
    /// AR coefficients of `phi(B) * (1 - B)^d`, used for psi-weights.
    integrated_ar: Vec<f64>,
}

impl Arima {
    /// Validates the parameters and precomputes the integrated AR
    /// polynomial.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidParameters`] for a differencing order
    /// above 2, a negative or non-finite variance, or non-finite
    /// coefficients.
    pub fn new(params: ArimaParams) -> Result<Self, ModelError> {
        if params.d > MAX_DIFFERENCING {
            return Err(ModelError::InvalidParameters {
                message: format!(
                    "differencing order {} exceeds {MAX_DIFFERENCING}",
                    params.d
                ),
            });
        }
        if !params.sigma2.is_finite() || params.sigma2 < 0.0 {
            return Err(ModelError::InvalidParameters {
                message: format!("sigma2 must be finite and >= 0, got {}", params.sigma2),
            });
        }
        if !params.constant.is_finite()
            || params.ar.iter().chain(&params.ma).any(|c| !c.is_finite())
        {
            return Err(ModelError::InvalidParameters {
                message: "coefficients must be finite".to_string(),
            });
        }

        let integrated_ar = integrate_ar(&params.ar, params.d);

        Ok(Self {
            params,
            integrated_ar,
        })
    }

    /// The fitted parameters.
    #[must_use]
    pub const fn params(&self) -> &ArimaParams {
        &self.params
    }

    fn residuals(&self, w: &[f64]) -> Vec<f64> {
        let mut errors: Vec<f64> = Vec::with_capacity(w.len());
        for t in 0..w.len() {
            let predicted = self.one_step(t, |i| w[i], |j| errors[j]);
            errors.push(w[t] - predicted);
        }
        errors
    }

    /// Conditional expectation of the differenced series at `t`, reading
    /// past values and errors through the supplied accessors.
    fn one_step(
        &self,
        t: usize,
        value: impl Fn(usize) -> f64,
        error: impl Fn(usize) -> f64,
    ) -> f64 {
        let ar: f64 = self
            .params
            .ar
            .iter()
            .enumerate()
            .filter(|(i, _)| t > *i)
            .map(|(i, phi)| phi * value(t - i - 1))
            .sum();
        let ma: f64 = self
            .params
            .ma
            .iter()
            .enumerate()
            .filter(|(j, _)| t > *j)
            .map(|(j, theta)| theta * error(t - j - 1))
            .sum();
        self.params.constant + ar + ma
    }

    fn forecast_differenced(&self, w: &[f64], residuals: &[f64], horizon: usize) -> Vec<f64> {
        let n = w.len();
        let mut extended = w.to_vec();
        for h in 0..horizon {
            let t = n + h;
            let next = self.one_step(
                t,
                |i| extended[i],
                |j| if j < n { residuals[j] } else { 0.0 },
            );
            extended.push(next);
        }
        extended.split_off(n)
    }

    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        let mut psi: Vec<f64> = Vec::with_capacity(horizon);
        for j in 0..horizon {
            if j == 0 {
                psi.push(1.0);
                continue;
            }
            let theta = self.params.ma.get(j - 1).copied().unwrap_or(0.0);
            let ar: f64 = self
                .integrated_ar
                .iter()
                .enumerate()
                .take(j)
                .map(|(i, a)| a * psi[j - i - 1])
                .sum();
            psi.push(theta + ar);
        }
        psi
    }
}

impl Forecaster for Arima {
    fn family(&self) -> &str {
        FAMILY
    }

    fn predict(
        &self,
        history: &[f64],
        horizon: usize,
        level: u8,
    ) -> Result<RawForecast, ModelError> {
        let d = self.params.d;
        if history.len() <= d {
            return Err(ModelError::InsufficientHistory {
                needed: d + 1,
                got: history.len(),
            });
        }

        let mut levels = vec![history.to_vec()];
        for _ in 0..d {
            let differenced: Vec<f64> = levels
                .last()
                .map(|prev| prev.windows(2).map(|pair| pair[1] - pair[0]).collect())
                .unwrap_or_default();
            levels.push(differenced);
        }

        let w = &levels[d];
        let residuals = self.residuals(w);
        let mut point = self.forecast_differenced(w, &residuals, horizon);

        for series in levels[..d].iter().rev() {
            let mut last = series.last().copied().unwrap_or(0.0);
            point = point
                .into_iter()
                .map(|delta| {
                    last += delta;
                    last
                })
                .collect();
        }

        let z = z_score(level);
        let mut cumulative = 0.0;
        let (lower, upper): (Vec<f64>, Vec<f64>) = self
            .psi_weights(horizon)
            .into_iter()
            .zip(&point)
            .map(|(psi, mean)| {
                cumulative += psi * psi;
                let half_width = z * (self.params.sigma2 * cumulative).sqrt();
                (mean - half_width, mean + half_width)
            })
            .unzip();

        log::trace!(
            "ARIMA({}, {d}, {}) forecast {horizon} steps from {} observations",
            self.params.ar.len(),
            self.params.ma.len(),
            history.len()
        );

        let mut raw = RawForecast::default();
        raw.insert(FAMILY, point);
        raw.insert(format!("{FAMILY}-lo-{level}"), lower);
        raw.insert(format!("{FAMILY}-hi-{level}"), upper);
        Ok(raw)
    }
}

/// Multiplies `1 - phi_1 B - ... - phi_p B^p` by `(1 - B)^d` and returns
/// the AR coefficients of the product.
fn integrate_ar(ar: &[f64], d: usize) -> Vec<f64> {
    let mut poly: Vec<f64> = std::iter::once(1.0).chain(ar.iter().map(|c| -c)).collect();
    for _ in 0..d {
        let mut next = vec![0.0; poly.len() + 1];
        for (i, c) in poly.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c;
        }
        poly = next;
    }
    poly.into_iter().skip(1).map(|c| -c).collect()
}
