//! Online anomaly detectors
//!
//! Each detector keeps a bounded ring of recent values and scores the next
//! sample against it. Below the detector-specific warm-up minimum the
//! verdict is `{is_anomaly: false, score: 0}`, with the value still
//! appended to the ring.

use crate::analytics::error::AnalyticsError;
use crate::analytics::stats::{mean, mean_abs_deviation, percentile, sample_stddev};
use crate::storage::types::Sample;
use serde::Serialize;
use std::collections::VecDeque;

/// Floor for divisors so constant windows produce finite scores.
const EPSILON: f64 = 1e-10;

/// Minimum ring sizes before a detector produces real verdicts.
pub const ZSCORE_MIN_POINTS: usize = 3;
pub const IQR_MIN_POINTS: usize = 4;
pub const MOVING_MAD_MIN_POINTS: usize = 2;

/// Expected value range reported alongside a verdict
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
}

/// The result of scoring one sample
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub score: f64,
    pub threshold: f64,
    pub method: &'static str,
    /// Unix timestamp in nanoseconds of the scored sample
    pub timestamp: i64,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_range: Option<ExpectedRange>,
}

/// Which detector to build for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    ZScore,
    Iqr,
    MovingMad,
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zscore" | "z-score" | "z_score" => Ok(DetectorKind::ZScore),
            "iqr" => Ok(DetectorKind::Iqr),
            "moving_mad" | "moving-mad" | "mad" => Ok(DetectorKind::MovingMad),
            other => Err(format!("unknown detector method '{}'", other)),
        }
    }
}

impl DetectorKind {
    pub fn build(self, threshold: f64, window_size: usize) -> Box<dyn Detector> {
        match self {
            DetectorKind::ZScore => Box::new(ZScoreDetector::new(threshold, window_size)),
            DetectorKind::Iqr => Box::new(IqrDetector::new(threshold, window_size)),
            DetectorKind::MovingMad => Box::new(MovingMadDetector::new(threshold, window_size)),
        }
    }
}

/// An online anomaly detector over a sliding window of values.
pub trait Detector: Send {
    fn name(&self) -> &'static str;
    fn threshold(&self) -> f64;
    fn set_threshold(&mut self, threshold: f64);

    /// Replace the ring with the most recent `window_size` training values.
    fn train(&mut self, points: &[Sample]) -> Result<(), AnalyticsError>;

    /// Score one sample against the current window, then absorb it.
    fn detect(&mut self, sample: Sample) -> AnomalyResult;
}

fn ring_from_training(points: &[Sample], window_size: usize) -> Result<VecDeque<f64>, AnalyticsError> {
    if points.is_empty() {
        return Err(AnalyticsError::InsufficientData {
            needed: 1,
            got: 0,
        });
    }
    let start = points.len().saturating_sub(window_size);
    Ok(points[start..].iter().map(|p| p.value).collect())
}

fn push_bounded(values: &mut VecDeque<f64>, value: f64, window_size: usize) {
    values.push_back(value);
    while values.len() > window_size {
        values.pop_front();
    }
}

fn warmup_result(
    method: &'static str,
    threshold: f64,
    sample: Sample,
) -> AnomalyResult {
    AnomalyResult {
        is_anomaly: false,
        score: 0.0,
        threshold,
        method,
        timestamp: sample.timestamp,
        value: sample.value,
        expected_range: None,
    }
}

/// Z-score detector: running mean and sample standard deviation.
pub struct ZScoreDetector {
    threshold: f64,
    window_size: usize,
    values: VecDeque<f64>,
    mean: f64,
    std_dev: f64,
}

impl ZScoreDetector {
    pub fn new(threshold: f64, window_size: usize) -> Self {
        Self {
            threshold,
            window_size: window_size.max(1),
            values: VecDeque::new(),
            mean: 0.0,
            std_dev: 0.0,
        }
    }

    fn update_statistics(&mut self) {
        let values: Vec<f64> = self.values.iter().copied().collect();
        self.mean = mean(&values);
        self.std_dev = sample_stddev(&values, self.mean);
    }
}

impl Detector for ZScoreDetector {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    fn train(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        self.values = ring_from_training(points, self.window_size)?;
        self.update_statistics();
        Ok(())
    }

    fn detect(&mut self, sample: Sample) -> AnomalyResult {
        if self.values.len() < ZSCORE_MIN_POINTS {
            push_bounded(&mut self.values, sample.value, self.window_size);
            self.update_statistics();
            return warmup_result(self.name(), self.threshold, sample);
        }

        let sigma = self.std_dev.max(EPSILON);
        let score = (sample.value - self.mean).abs() / sigma;
        let result = AnomalyResult {
            is_anomaly: score > self.threshold,
            score,
            threshold: self.threshold,
            method: self.name(),
            timestamp: sample.timestamp,
            value: sample.value,
            expected_range: Some(ExpectedRange {
                min: self.mean - self.threshold * sigma,
                max: self.mean + self.threshold * sigma,
            }),
        };

        push_bounded(&mut self.values, sample.value, self.window_size);
        self.update_statistics();
        result
    }
}

/// Interquartile-range detector with a configurable multiplier.
pub struct IqrDetector {
    multiplier: f64,
    window_size: usize,
    values: VecDeque<f64>,
}

impl IqrDetector {
    /// Default bound multiplier when none is configured.
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;

    pub fn new(multiplier: f64, window_size: usize) -> Self {
        Self {
            multiplier,
            window_size: window_size.max(1),
            values: VecDeque::new(),
        }
    }
}

impl Detector for IqrDetector {
    fn name(&self) -> &'static str {
        "iqr"
    }

    fn threshold(&self) -> f64 {
        self.multiplier
    }

    fn set_threshold(&mut self, threshold: f64) {
        self.multiplier = threshold;
    }

    fn train(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        self.values = ring_from_training(points, self.window_size)?;
        Ok(())
    }

    fn detect(&mut self, sample: Sample) -> AnomalyResult {
        if self.values.len() < IQR_MIN_POINTS {
            push_bounded(&mut self.values, sample.value, self.window_size);
            return warmup_result(self.name(), self.multiplier, sample);
        }

        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let q1 = percentile(&sorted, 25.0);
        let q3 = percentile(&sorted, 75.0);
        let iqr = q3 - q1;
        let lower = q1 - self.multiplier * iqr;
        let upper = q3 + self.multiplier * iqr;

        let width = iqr.max(EPSILON);
        let score = if sample.value < lower {
            (lower - sample.value) / width
        } else if sample.value > upper {
            (sample.value - upper) / width
        } else {
            0.0
        };

        let result = AnomalyResult {
            is_anomaly: sample.value < lower || sample.value > upper,
            score,
            threshold: self.multiplier,
            method: self.name(),
            timestamp: sample.timestamp,
            value: sample.value,
            expected_range: Some(ExpectedRange {
                min: lower,
                max: upper,
            }),
        };

        push_bounded(&mut self.values, sample.value, self.window_size);
        result
    }
}

/// Moving mean-absolute-deviation detector.
pub struct MovingMadDetector {
    threshold: f64,
    window_size: usize,
    values: VecDeque<f64>,
}

impl MovingMadDetector {
    pub fn new(threshold: f64, window_size: usize) -> Self {
        Self {
            threshold,
            window_size: window_size.max(1),
            values: VecDeque::new(),
        }
    }
}

impl Detector for MovingMadDetector {
    fn name(&self) -> &'static str {
        "moving_mad"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    fn train(&mut self, points: &[Sample]) -> Result<(), AnalyticsError> {
        self.values = ring_from_training(points, self.window_size)?;
        Ok(())
    }

    fn detect(&mut self, sample: Sample) -> AnomalyResult {
        if self.values.len() < MOVING_MAD_MIN_POINTS {
            push_bounded(&mut self.values, sample.value, self.window_size);
            return warmup_result(self.name(), self.threshold, sample);
        }

        let values: Vec<f64> = self.values.iter().copied().collect();
        let average = mean(&values);
        let mad = mean_abs_deviation(&values, average).max(EPSILON);
        let score = (sample.value - average).abs() / mad;

        let result = AnomalyResult {
            is_anomaly: score > self.threshold,
            score,
            threshold: self.threshold,
            method: self.name(),
            timestamp: sample.timestamp,
            value: sample.value,
            expected_range: Some(ExpectedRange {
                min: average - self.threshold * mad,
                max: average + self.threshold * mad,
            }),
        };

        push_bounded(&mut self.values, sample.value, self.window_size);
        result
    }
}
