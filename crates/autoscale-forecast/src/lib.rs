//! Short-horizon request-rate forecasting.
//!
//! The distilled source fits an automatically-ordered seasonal ARIMA model.
//! No crate in this codebase's dependency corpus performs automatic seasonal
//! ordering, so [`Forecaster`] instead fits a bounded set of candidate AR(p)
//! models (`p = 1..=3`, no seasonal component) by ordinary least squares,
//! picks the order minimising AIC, and predicts [`HORIZON`] steps ahead by
//! iterated one-step prediction. This is a deliberate, documented redesign
//! (see DESIGN.md) — the observable contract (`forecast() -> up to HORIZON
//! ceiling'd non-negative integers`, empty on any fitting failure) matches
//! the source.

#![forbid(unsafe_code)]

use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Number of periods the forecaster predicts ahead.
pub const HORIZON: usize = 6;

/// Candidate AR orders tried, in order, before picking the AIC-minimising one.
const CANDIDATE_ORDERS: [usize; 3] = [1, 2, 3];

/// Fits an AR(p) model to a `requests` time series and keeps the current
/// short-horizon forecast.
#[derive(Debug, Clone)]
pub struct Forecaster {
    min_memory_size: usize,
    current: Vec<i64>,
}

impl Forecaster {
    pub fn new(min_memory_size: usize) -> Self {
        Self {
            min_memory_size,
            current: Vec::new(),
        }
    }

    /// Refit against `series` (the last `train_size` `requests` values, in
    /// chronological order). `total_records` is the StatStore's total history
    /// length — below `min_memory_size` the forecast is cleared without
    /// attempting a fit, matching the source's short-history guard.
    pub fn refit(&mut self, total_records: usize, series: &[f64]) {
        if total_records < self.min_memory_size {
            debug!(total_records, min_memory_size = self.min_memory_size, "too little history, skipping forecast");
            self.current.clear();
            return;
        }

        match fit_and_forecast(series) {
            Some(forecast) => {
                debug!(order = ?forecast.len(), forecast = ?forecast, "forecast refit succeeded");
                self.current = forecast;
            }
            None => {
                debug!("forecast refit failed, clearing forecast");
                self.current.clear();
            }
        }
    }

    pub fn forecast(&self) -> &[i64] {
        &self.current
    }

    pub fn has_forecast(&self) -> bool {
        !self.current.is_empty()
    }
}

struct ArModel {
    coeffs: Vec<f64>, // [intercept, phi_1, .., phi_p]
    aic: f64,
}

fn fit_and_forecast(series: &[f64]) -> Option<Vec<i64>> {
    if series.len() < 4 || series.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let best = CANDIDATE_ORDERS
        .iter()
        .filter_map(|&p| fit_ar(series, p))
        .min_by(|a, b| a.aic.partial_cmp(&b.aic).unwrap_or(std::cmp::Ordering::Equal))?;

    forecast_from(series, &best)
}

/// Ordinary least squares fit of `y_t = c + phi_1 y_{t-1} + .. + phi_p y_{t-p}`.
fn fit_ar(series: &[f64], p: usize) -> Option<ArModel> {
    let n = series.len();
    let rows = n.checked_sub(p)?;
    let params = p + 1;
    if rows < params + 1 {
        return None;
    }

    let mut x = DMatrix::<f64>::zeros(rows, params);
    let mut y = DVector::<f64>::zeros(rows);
    for t in 0..rows {
        let target = t + p;
        y[t] = series[target];
        x[(t, 0)] = 1.0;
        for lag in 1..=p {
            x[(t, lag)] = series[target - lag];
        }
    }

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let beta = xtx.lu().solve(&xty)?;

    let fitted = &x * &beta;
    let resid = &y - &fitted;
    let rss = resid.dot(&resid);
    if !rss.is_finite() {
        return None;
    }

    let n_f = rows as f64;
    let sigma2 = (rss / n_f).max(1e-12);
    let aic = n_f * sigma2.ln() + 2.0 * params as f64;
    if !aic.is_finite() {
        return None;
    }

    Some(ArModel {
        coeffs: beta.iter().copied().collect(),
        aic,
    })
}

fn forecast_from(series: &[f64], model: &ArModel) -> Option<Vec<i64>> {
    let p = model.coeffs.len() - 1;
    let n = series.len();
    // window[0] = y_{t-1} (most recent), window[p-1] = y_{t-p}
    let mut window: Vec<f64> = series[n - p..].iter().rev().copied().collect();

    let mut out = Vec::with_capacity(HORIZON);
    for _ in 0..HORIZON {
        let mut pred = model.coeffs[0];
        for lag in 1..=p {
            pred += model.coeffs[lag] * window[lag - 1];
        }
        if !pred.is_finite() {
            return None;
        }
        out.push(pred.ceil().max(0.0) as i64);
        window.insert(0, pred);
        window.truncate(p);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_history_below_minimum() {
        let mut f = Forecaster::new(11);
        f.refit(5, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!f.has_forecast());
        assert!(f.forecast().is_empty());
    }

    #[test]
    fn forecasts_horizon_points_for_trending_series() {
        let mut f = Forecaster::new(11);
        let series: Vec<f64> = (1..=20).map(|i| i as f64 * 10.0).collect();
        f.refit(20, &series);
        assert!(f.has_forecast());
        assert_eq!(f.forecast().len(), HORIZON);
        // A clearly increasing series should forecast growth, not collapse to zero.
        assert!(f.forecast().iter().all(|&v| v >= 0));
        assert!(*f.forecast().last().unwrap() > 0);
    }

    #[test]
    fn constant_series_yields_empty_forecast_not_a_panic() {
        let mut f = Forecaster::new(11);
        let series = vec![50.0; 20];
        f.refit(20, &series);
        // Collinear intercept/lag columns make every candidate order singular;
        // this is the "insufficient variance" failure mode from the spec.
        assert!(!f.has_forecast());
    }

    #[test]
    fn non_finite_input_is_swallowed() {
        let mut f = Forecaster::new(11);
        let mut series: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        series[10] = f64::NAN;
        f.refit(20, &series);
        assert!(!f.has_forecast());
    }
}
