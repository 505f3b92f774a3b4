//! Online analytics: anomaly detection and forecasting
//!
//! [`AnalyticsEngine`] keeps per-series detector and forecaster state,
//! separate from storage and keyed only by series id. Detectors are
//! created lazily from the configured defaults; forecasters are fit
//! explicitly and their results memoized per horizon for a bounded time.

pub mod detect;
pub mod error;
pub mod forecast;
pub mod stats;

pub use detect::{AnomalyResult, Detector, DetectorKind, ExpectedRange};
pub use error::{AnalyticsError, AnalyticsResult};
pub use forecast::{combine, EnsembleMethod, Forecast, ForecastKind, ForecastModel, ForecastPoint};

use crate::storage::types::Sample;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Analytics engine configuration
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Detector built for a series on first use
    pub default_method: DetectorKind,
    pub default_threshold: f64,
    pub default_window_size: usize,
    /// Bound on retained anomaly results per series
    pub max_results_per_series: usize,
    /// Forecaster built for a series on first fit
    pub forecast_method: ForecastKind,
    /// How long a memoized forecast stays valid
    pub forecast_cache_ttl: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_method: DetectorKind::ZScore,
            default_threshold: 3.0,
            default_window_size: 100,
            max_results_per_series: 1000,
            forecast_method: ForecastKind::Linear,
            forecast_cache_ttl: Duration::from_secs(300),
        }
    }
}

type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;
type SharedModel = Arc<Mutex<Box<dyn ForecastModel>>>;

/// Per-series analytics state, keyed by series id.
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    detectors: RwLock<HashMap<String, SharedDetector>>,
    results: RwLock<HashMap<String, VecDeque<AnomalyResult>>>,
    models: RwLock<HashMap<String, SharedModel>>,
    cache: Mutex<HashMap<(String, usize), Forecast>>,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            detectors: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn detector_for(&self, series_id: &str) -> SharedDetector {
        {
            let detectors = self.detectors.read().unwrap_or_else(|e| e.into_inner());
            if let Some(detector) = detectors.get(series_id) {
                return detector.clone();
            }
        }

        let mut detectors = self.detectors.write().unwrap_or_else(|e| e.into_inner());
        detectors
            .entry(series_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(self.config.default_method.build(
                    self.config.default_threshold,
                    self.config.default_window_size,
                )))
            })
            .clone()
    }

    /// Install a specific detector for a series, replacing any default.
    pub fn set_detector(&self, series_id: &str, detector: Box<dyn Detector>) {
        let mut detectors = self.detectors.write().unwrap_or_else(|e| e.into_inner());
        detectors.insert(series_id.to_string(), Arc::new(Mutex::new(detector)));
    }

    /// Train (or retrain) the series' detector on historical points.
    pub fn train_detector(&self, series_id: &str, points: &[Sample]) -> AnalyticsResult<()> {
        if series_id.is_empty() {
            return Err(AnalyticsError::InvalidArgument(
                "empty series id".to_string(),
            ));
        }
        let detector = self.detector_for(series_id);
        let mut detector = detector.lock().unwrap_or_else(|e| e.into_inner());
        detector.train(points)
    }

    /// Score one sample against the series' sliding window.
    pub fn detect(&self, series_id: &str, sample: Sample) -> AnomalyResult {
        let detector = self.detector_for(series_id);
        let result = {
            let mut detector = detector.lock().unwrap_or_else(|e| e.into_inner());
            detector.detect(sample)
        };

        if result.is_anomaly {
            tracing::debug!(
                series_id,
                score = result.score,
                method = result.method,
                "anomaly detected"
            );
        }
        self.store_result(series_id, result.clone());
        result
    }

    fn store_result(&self, series_id: &str, result: AnomalyResult) {
        let mut results = self.results.write().unwrap_or_else(|e| e.into_inner());
        let ring = results.entry(series_id.to_string()).or_default();
        ring.push_back(result);
        while ring.len() > self.config.max_results_per_series {
            ring.pop_front();
        }
    }

    /// Most recent detection results for a series, oldest first.
    pub fn recent_results(&self, series_id: &str, limit: usize) -> Vec<AnomalyResult> {
        let results = self.results.read().unwrap_or_else(|e| e.into_inner());
        let Some(ring) = results.get(series_id) else {
            return Vec::new();
        };
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Fit (or refit) the series' forecaster from a point history. Any
    /// cached forecasts for the series become stale and are dropped.
    pub fn train_forecaster(&self, series_id: &str, points: &[Sample]) -> AnalyticsResult<()> {
        if series_id.is_empty() {
            return Err(AnalyticsError::InvalidArgument(
                "empty series id".to_string(),
            ));
        }

        let model = {
            let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
            models
                .entry(series_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(self.config.forecast_method.build())))
                .clone()
        };

        {
            let mut model = model.lock().unwrap_or_else(|e| e.into_inner());
            model.fit(points)?;
        }

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.retain(|(id, _), _| id != series_id);
        Ok(())
    }

    /// Predict `horizon` steps forward for a previously fitted series.
    /// Results are memoized per (series, horizon) within the configured
    /// TTL.
    pub fn forecast(&self, series_id: &str, horizon: usize) -> AnalyticsResult<Forecast> {
        let key = (series_id.to_string(), horizon);
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(&key) {
                let age = Utc::now() - cached.generated_at;
                if age.to_std().unwrap_or(Duration::MAX) < self.config.forecast_cache_ttl {
                    return Ok(cached.clone());
                }
            }
        }

        let model = {
            let models = self.models.read().unwrap_or_else(|e| e.into_inner());
            models
                .get(series_id)
                .cloned()
                .ok_or_else(|| AnalyticsError::NotTrained("forecaster"))?
        };

        let forecast = {
            let model = model.lock().unwrap_or_else(|e| e.into_inner());
            model.forecast(horizon)?
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, forecast.clone());
        Ok(forecast)
    }

    /// Fit every forecaster on the same history and combine their
    /// predictions.
    ///
    /// Models that cannot fit the history (e.g. Holt-Winters without a
    /// full seasonal period) are skipped; the combination covers whichever
    /// models remain. Fails with `InsufficientData` only when every model
    /// is skipped.
    pub fn forecast_ensemble(
        &self,
        series_id: &str,
        training: &[Sample],
        horizon: usize,
        method: EnsembleMethod,
    ) -> AnalyticsResult<Forecast> {
        if series_id.is_empty() {
            return Err(AnalyticsError::InvalidArgument(
                "empty series id".to_string(),
            ));
        }

        let kinds = [
            ForecastKind::Linear,
            ForecastKind::HoltWinters,
            ForecastKind::Persistence,
        ];

        let mut forecasts = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let mut model = kind.build();
            match model.fit(training).and_then(|()| model.forecast(horizon)) {
                Ok(forecast) => forecasts.push(forecast),
                Err(e) => {
                    tracing::debug!(series_id, model = model.name(), error = %e, "skipping ensemble member");
                }
            }
        }

        combine(&forecasts, method).ok_or(AnalyticsError::InsufficientData {
            needed: 2,
            got: training.len(),
        })
    }

    /// Drop all analytics state for a deleted series.
    pub fn remove_series(&self, series_id: &str) {
        self.detectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(series_id);
        self.results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(series_id);
        self.models
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(series_id);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _), _| id != series_id);
    }

    /// Number of series with live detector state.
    pub fn tracked_series(&self) -> usize {
        self.detectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
