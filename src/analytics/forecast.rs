//! Short-horizon forecasters
//!
//! Every model is fit-then-predict: `fit` estimates parameters from a
//! point history, `forecast` extrapolates a bounded horizon forward.
//! Prediction timestamps step by the median interval of the training
//! points so the output follows the series' native cadence. Confidence
//! bands are fixed fractions of the predicted value, not statistical
//! intervals, and accuracy is self-reported per model.

use crate::analytics::error::AnalyticsError;
use crate::analytics::stats::median_interval_nanos;
use crate::storage::types::{now_nanos, Sample};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default seasonal period for Holt-Winters (daily cycle of hourly data).
pub const DEFAULT_SEASONAL_PERIOD: usize = 24;

/// One predicted point
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ForecastPoint {
    /// Unix timestamp in nanoseconds
    pub timestamp: i64,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A bounded horizon of predictions plus metadata
#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub predictions: Vec<ForecastPoint>,
    pub method: &'static str,
    /// Self-reported accuracy in [0, 1]
    pub accuracy: f64,
    pub horizon: usize,
    pub generated_at: DateTime<Utc>,
}

/// Which forecaster to build for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastKind {
    Linear,
    HoltWinters,
    Persistence,
}

impl std::str::FromStr for ForecastKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" | "linear_trend" => Ok(ForecastKind::Linear),
            "holt_winters" | "holt-winters" => Ok(ForecastKind::HoltWinters),
            "persistence" => Ok(ForecastKind::Persistence),
            other => Err(format!("unknown forecast method '{}'", other)),
        }
    }
}

impl ForecastKind {
    pub fn build(self) -> Box<dyn ForecastModel> {
        match self {
            ForecastKind::Linear => Box::new(LinearTrendModel::new()),
            ForecastKind::HoltWinters => {
                Box::new(HoltWintersModel::new(DEFAULT_SEASONAL_PERIOD))
            }
            ForecastKind::Persistence => Box::new(PersistenceModel::new()),
        }
    }
}

/// A fit-then-predict forecaster.
pub trait ForecastModel: Send {
    fn name(&self) -> &'static str;
    fn accuracy(&self) -> f64;

    /// Estimate parameters from an ascending point history.
    fn fit(&mut self, points: &[Sample]) -> Result<(), AnalyticsError>;

    /// Predict `horizon` steps forward. Horizon 0 yields empty
    /// predictions; forecasting before a successful fit fails.
    fn forecast(&self, horizon: usize) -> Result<Forecast, AnalyticsError>;
}

fn build_forecast(
    method: &'static str,
    accuracy: f64,
    horizon: usize,
    step_nanos: i64,
    band: f64,
    mut value_at: impl FnMut(usize) -> f64,
) -> Forecast {
    let now = now_nanos();
    let predictions = (0..horizon)
        .map(|k| {
            let value = value_at(k);
            let confidence = (value * band).abs();
            ForecastPoint {
                timestamp: now + k as i64 * step_nanos,
                value,
                lower: value - confidence,
                upper: value + confidence,
            }
        })
        .collect();

    Forecast {
        predictions,
        method,
        accuracy,
        horizon,
        generated_at: Utc::now(),
    }
}

/// Ordinary least squares on (seconds since first point, value).
pub struct LinearTrendModel {
    slope: f64,
    intercept: f64,
    step_nanos: i64,
    trained: bool,
}

impl LinearTrendModel {
    pub fn new() -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            step_nanos: 0,
            trained: false,
        }
    }
}

impl Default for LinearTrendModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastModel for LinearTrendModel {
    fn name(&self) -> &'static str {
        "linear_trend"
    }

    fn accuracy(&self) -> f64 {
        0.7
    }

    fn fit(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        if points.len() < 2 {
            return Err(AnalyticsError::InsufficientData {
                needed: 2,
                got: points.len(),
            });
        }

        let t0 = points[0].timestamp;
        let n = points.len() as f64;
        let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
        for point in points {
            let x = (point.timestamp - t0) as f64 / 1e9;
            sum_x += x;
            sum_y += point.value;
            sum_xy += x * point.value;
            sum_x2 += x * x;
        }

        let denom = n * sum_x2 - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            // All points share one timestamp; the trend degenerates to flat.
            self.slope = 0.0;
            self.intercept = sum_y / n;
        } else {
            self.slope = (n * sum_xy - sum_x * sum_y) / denom;
            self.intercept = (sum_y - self.slope * sum_x) / n;
        }

        self.step_nanos = median_interval_nanos(points);
        self.trained = true;
        Ok(())
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, AnalyticsError> {
        if !self.trained {
            return Err(AnalyticsError::NotTrained(self.name()));
        }

        Ok(build_forecast(
            self.name(),
            self.accuracy(),
            horizon,
            self.step_nanos,
            0.10,
            |k| self.slope * (k + 1) as f64 + self.intercept,
        ))
    }
}

/// Multiplicative Holt-Winters with period `P`.
///
/// Level, trend, and seasonal factors are initialized from the first
/// period (`seasonal[i] = y_i / level`) and refined over the remaining
/// points with multiplicative smoothing updates; seasonality is
/// multiplicative throughout. Requires at least `P` training points.
pub struct HoltWintersModel {
    period: usize,
    alpha: f64,
    beta: f64,
    gamma: f64,
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    step_nanos: i64,
    trained: bool,
}

impl HoltWintersModel {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(2),
            alpha: 0.3,
            beta: 0.1,
            gamma: 0.1,
            level: 0.0,
            trend: 0.0,
            seasonal: Vec::new(),
            step_nanos: 0,
            trained: false,
        }
    }
}

impl ForecastModel for HoltWintersModel {
    fn name(&self) -> &'static str {
        "holt_winters"
    }

    fn accuracy(&self) -> f64 {
        0.8
    }

    fn fit(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        if points.len() < self.period {
            return Err(AnalyticsError::InsufficientData {
                needed: self.period,
                got: points.len(),
            });
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();

        self.level = values[0];
        self.trend = values[1] - values[0];
        self.seasonal = values[..self.period]
            .iter()
            .map(|&v| if self.level != 0.0 { v / self.level } else { 1.0 })
            .collect();

        for t in self.period..values.len() {
            let idx = t % self.period;
            let seasonal = if self.seasonal[idx] != 0.0 {
                self.seasonal[idx]
            } else {
                1.0
            };

            let new_level =
                self.alpha * (values[t] / seasonal) + (1.0 - self.alpha) * (self.level + self.trend);
            self.trend = self.beta * (new_level - self.level) + (1.0 - self.beta) * self.trend;
            if new_level != 0.0 {
                self.seasonal[idx] =
                    self.gamma * (values[t] / new_level) + (1.0 - self.gamma) * self.seasonal[idx];
            }
            self.level = new_level;
        }

        self.step_nanos = median_interval_nanos(points);
        self.trained = true;
        Ok(())
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, AnalyticsError> {
        if !self.trained {
            return Err(AnalyticsError::NotTrained(self.name()));
        }

        Ok(build_forecast(
            self.name(),
            self.accuracy(),
            horizon,
            self.step_nanos,
            0.15,
            |k| {
                let i = k + 1;
                let seasonal = self.seasonal[i % self.period];
                let factor = if seasonal != 0.0 { seasonal } else { 1.0 };
                (self.level + i as f64 * self.trend) * factor
            },
        ))
    }
}

/// Baseline persistence: the last observed value, flat across the horizon.
pub struct PersistenceModel {
    last_value: f64,
    step_nanos: i64,
    trained: bool,
}

impl PersistenceModel {
    pub fn new() -> Self {
        Self {
            last_value: 0.0,
            step_nanos: 0,
            trained: false,
        }
    }
}

impl Default for PersistenceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastModel for PersistenceModel {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn accuracy(&self) -> f64 {
        0.75
    }

    fn fit(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        let Some(last) = points.last() else {
            return Err(AnalyticsError::InsufficientData { needed: 1, got: 0 });
        };
        self.last_value = last.value;
        self.step_nanos = median_interval_nanos(points);
        self.trained = true;
        Ok(())
    }

    fn forecast(&self, horizon: usize) -> Result<Forecast, AnalyticsError> {
        if !self.trained {
            return Err(AnalyticsError::NotTrained(self.name()));
        }

        Ok(build_forecast(
            self.name(),
            self.accuracy(),
            horizon,
            self.step_nanos,
            0.12,
            |_| self.last_value,
        ))
    }
}

/// How to combine forecasts from several models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleMethod {
    /// Unweighted mean per step
    Average,
    /// Accuracy-weighted mean per step; falls back to `Average` when all
    /// reported accuracies are zero
    Weighted,
    /// The single forecast with the highest reported accuracy
    Best,
}

/// Combine forecasts into one. Returns `None` for an empty input. All
/// inputs are expected to share a horizon; shorter ones contribute to the
/// steps they cover.
pub fn combine(forecasts: &[Forecast], method: EnsembleMethod) -> Option<Forecast> {
    if forecasts.is_empty() {
        return None;
    }
    if forecasts.len() == 1 {
        return Some(forecasts[0].clone());
    }

    match method {
        EnsembleMethod::Best => forecasts
            .iter()
            .max_by(|a, b| {
                a.accuracy
                    .partial_cmp(&b.accuracy)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned(),
        EnsembleMethod::Weighted => {
            let total: f64 = forecasts.iter().map(|f| f.accuracy).sum();
            if total <= 0.0 {
                // Nothing to weight by; degrade gracefully.
                return combine(forecasts, EnsembleMethod::Average);
            }
            Some(combine_weighted(forecasts, "ensemble_weighted", |f| {
                f.accuracy / total
            }))
        }
        EnsembleMethod::Average => {
            let weight = 1.0 / forecasts.len() as f64;
            Some(combine_weighted(forecasts, "ensemble_average", |_| weight))
        }
    }
}

fn combine_weighted(
    forecasts: &[Forecast],
    method: &'static str,
    weight_of: impl Fn(&Forecast) -> f64,
) -> Forecast {
    let horizon = forecasts
        .iter()
        .map(|f| f.predictions.len())
        .max()
        .unwrap_or(0);

    let mut predictions = Vec::with_capacity(horizon);
    for step in 0..horizon {
        let mut value = 0.0;
        let mut lower = 0.0;
        let mut upper = 0.0;
        let mut timestamp = 0;
        let mut covered = 0.0;

        for forecast in forecasts {
            if let Some(point) = forecast.predictions.get(step) {
                let w = weight_of(forecast);
                value += point.value * w;
                lower += point.lower * w;
                upper += point.upper * w;
                timestamp = point.timestamp;
                covered += w;
            }
        }

        // Renormalize steps not covered by every model.
        if covered > 0.0 {
            value /= covered;
            lower /= covered;
            upper /= covered;
        }

        predictions.push(ForecastPoint {
            timestamp,
            value,
            lower,
            upper,
        });
    }

    let accuracy = forecasts.iter().map(|f| f.accuracy * weight_of(f)).sum::<f64>();

    Forecast {
        predictions,
        method,
        accuracy,
        horizon,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::NANOS_PER_SEC;

    const MINUTE: i64 = 60 * NANOS_PER_SEC;

    fn trending(count: usize, start: f64, slope_per_step: f64) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(i as i64 * MINUTE, start + i as f64 * slope_per_step))
            .collect()
    }

    #[test]
    fn kind_parses_known_names() {
        assert_eq!("linear".parse::<ForecastKind>(), Ok(ForecastKind::Linear));
        assert_eq!(
            "holt_winters".parse::<ForecastKind>(),
            Ok(ForecastKind::HoltWinters)
        );
        assert_eq!(
            "persistence".parse::<ForecastKind>(),
            Ok(ForecastKind::Persistence)
        );
        assert!("arima".parse::<ForecastKind>().is_err());
    }

    #[test]
    fn linear_needs_two_points() {
        let mut model = LinearTrendModel::new();
        assert!(matches!(
            model.fit(&trending(1, 0.0, 0.0)),
            Err(AnalyticsError::InsufficientData { needed: 2, .. })
        ));
    }

    #[test]
    fn linear_recovers_slope_and_intercept() {
        let mut model = LinearTrendModel::new();
        // y = 10 + 2 per minute step → slope 2/60 per second.
        model.fit(&trending(30, 10.0, 2.0)).unwrap();

        assert!((model.slope - 2.0 / 60.0).abs() < 1e-9);
        assert!((model.intercept - 10.0).abs() < 1e-6);
    }

    #[test]
    fn linear_forecast_steps_use_native_cadence() {
        let mut model = LinearTrendModel::new();
        model.fit(&trending(30, 10.0, 2.0)).unwrap();

        let forecast = model.forecast(5).unwrap();
        assert_eq!(forecast.predictions.len(), 5);
        assert_eq!(forecast.method, "linear_trend");

        // Timestamps step by the one-minute training cadence.
        let delta = forecast.predictions[1].timestamp - forecast.predictions[0].timestamp;
        assert_eq!(delta, MINUTE);

        // Bands bracket the prediction.
        for point in &forecast.predictions {
            assert!(point.lower <= point.value && point.value <= point.upper);
        }
    }

    #[test]
    fn forecast_before_fit_fails() {
        let model = LinearTrendModel::new();
        assert!(matches!(
            model.forecast(5),
            Err(AnalyticsError::NotTrained("linear_trend"))
        ));
    }

    #[test]
    fn zero_horizon_is_empty_not_an_error() {
        let mut model = PersistenceModel::new();
        model.fit(&trending(3, 1.0, 0.0)).unwrap();

        let forecast = model.forecast(0).unwrap();
        assert!(forecast.predictions.is_empty());
        assert_eq!(forecast.horizon, 0);
    }

    #[test]
    fn degenerate_timestamps_fit_flat() {
        let mut model = LinearTrendModel::new();
        let same_instant = vec![Sample::new(5, 10.0), Sample::new(5, 20.0)];
        model.fit(&same_instant).unwrap();

        assert_eq!(model.slope, 0.0);
        assert_eq!(model.intercept, 15.0);
    }

    #[test]
    fn holt_winters_needs_a_full_period() {
        let mut model = HoltWintersModel::new(24);
        assert!(matches!(
            model.fit(&trending(10, 1.0, 0.0)),
            Err(AnalyticsError::InsufficientData { needed: 24, .. })
        ));
    }

    #[test]
    fn holt_winters_tracks_seasonal_shape() {
        let mut model = HoltWintersModel::new(24);
        // Three days of a daily sine pattern around 100.
        let points: Vec<Sample> = (0..72)
            .map(|i| {
                let phase = (i % 24) as f64 / 24.0 * std::f64::consts::TAU;
                Sample::new(i as i64 * 3600 * NANOS_PER_SEC, 100.0 + 20.0 * phase.sin())
            })
            .collect();
        model.fit(&points).unwrap();

        let forecast = model.forecast(24).unwrap();
        assert_eq!(forecast.predictions.len(), 24);
        // The forecast keeps oscillating rather than flattening out.
        let values: Vec<f64> = forecast.predictions.iter().map(|p| p.value).collect();
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(max - min > 10.0);

        // Hourly cadence carried over from training.
        let delta = forecast.predictions[1].timestamp - forecast.predictions[0].timestamp;
        assert_eq!(delta, 3600 * NANOS_PER_SEC);
    }

    #[test]
    fn holt_winters_handles_zero_level() {
        let mut model = HoltWintersModel::new(4);
        let zeros = trending(8, 0.0, 0.0);
        model.fit(&zeros).unwrap();

        let forecast = model.forecast(4).unwrap();
        assert!(forecast.predictions.iter().all(|p| p.value.is_finite()));
    }

    #[test]
    fn persistence_is_flat_at_last_value() {
        let mut model = PersistenceModel::new();
        model.fit(&trending(10, 5.0, 1.0)).unwrap();

        let forecast = model.forecast(3).unwrap();
        assert!(forecast.predictions.iter().all(|p| p.value == 14.0));
        assert_eq!(forecast.method, "persistence");
    }

    fn flat_forecast(value: f64, accuracy: f64, steps: usize) -> Forecast {
        Forecast {
            predictions: (0..steps)
                .map(|k| ForecastPoint {
                    timestamp: k as i64 * MINUTE,
                    value,
                    lower: value - 1.0,
                    upper: value + 1.0,
                })
                .collect(),
            method: "test",
            accuracy,
            horizon: steps,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn ensemble_average_is_unweighted() {
        let combined = combine(
            &[flat_forecast(10.0, 0.9, 3), flat_forecast(20.0, 0.1, 3)],
            EnsembleMethod::Average,
        )
        .unwrap();

        assert_eq!(combined.predictions.len(), 3);
        assert!((combined.predictions[0].value - 15.0).abs() < 1e-9);
    }

    #[test]
    fn ensemble_weighted_leans_on_accuracy() {
        let combined = combine(
            &[flat_forecast(10.0, 0.9, 3), flat_forecast(20.0, 0.1, 3)],
            EnsembleMethod::Weighted,
        )
        .unwrap();

        // 10 * 0.9 + 20 * 0.1 = 11.
        assert!((combined.predictions[0].value - 11.0).abs() < 1e-9);
    }

    #[test]
    fn ensemble_weighted_falls_back_when_weights_vanish() {
        let combined = combine(
            &[flat_forecast(10.0, 0.0, 3), flat_forecast(20.0, 0.0, 3)],
            EnsembleMethod::Weighted,
        )
        .unwrap();

        assert_eq!(combined.method, "ensemble_average");
        assert!((combined.predictions[0].value - 15.0).abs() < 1e-9);
    }

    #[test]
    fn ensemble_best_picks_highest_accuracy() {
        let combined = combine(
            &[flat_forecast(10.0, 0.6, 3), flat_forecast(20.0, 0.8, 3)],
            EnsembleMethod::Best,
        )
        .unwrap();

        assert_eq!(combined.predictions[0].value, 20.0);
    }

    #[test]
    fn ensemble_of_nothing_is_none() {
        assert!(combine(&[], EnsembleMethod::Average).is_none());
    }

    #[test]
    fn ensemble_of_one_passes_through() {
        let single = flat_forecast(10.0, 0.6, 2);
        let combined = combine(std::slice::from_ref(&single), EnsembleMethod::Weighted).unwrap();
        assert_eq!(combined.predictions, single.predictions);
    }
}
