//! Core data types for the storage layer
//!
//! - `Sample`: a single timestamped measurement
//! - `Aggregation`: range aggregation semantics
//! - `SeriesInfo`: series metadata returned by listings

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Label mapping attached to a series.
pub type Labels = HashMap<String, String>;

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Saturates at `i64::MAX` (year 2262) rather than failing.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A single time-series sample
///
/// Timestamps are nanoseconds since the Unix epoch; values are IEEE-754
/// doubles. Samples are immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in nanoseconds
    pub timestamp: i64,
    /// The measured value
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// How to aggregate sample values over a time range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Arithmetic mean; NaN over an empty range
    Avg,
    /// Maximum value; NaN over an empty range, NaN inputs compare low
    Max,
    /// Minimum value; NaN over an empty range, NaN inputs compare high
    Min,
    /// Running sum; 0 over an empty range
    Sum,
}

impl Aggregation {
    /// Apply this aggregation to a slice of samples.
    pub fn apply(&self, samples: &[Sample]) -> f64 {
        match self {
            Aggregation::Avg => {
                if samples.is_empty() {
                    f64::NAN
                } else {
                    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
                }
            }
            Aggregation::Max => {
                if samples.is_empty() {
                    f64::NAN
                } else {
                    samples
                        .iter()
                        .map(|s| s.value)
                        .fold(f64::NEG_INFINITY, f64::max)
                }
            }
            Aggregation::Min => {
                if samples.is_empty() {
                    f64::NAN
                } else {
                    samples.iter().map(|s| s.value).fold(f64::INFINITY, f64::min)
                }
            }
            Aggregation::Sum => samples.iter().map(|s| s.value).sum(),
        }
    }
}

/// Metadata about a stored series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub id: String,
    pub labels: Labels,
    pub size: usize,
    /// Unix timestamp in nanoseconds of the last write
    pub last_seen: i64,
}

/// Check that a series' labels contain every (key, value) pair in `filters`.
///
/// AND semantics with exact string equality; a missing key fails the match.
/// An empty filter map matches everything.
pub fn matches_labels(labels: &Labels, filters: &Labels) -> bool {
    filters
        .iter()
        .all(|(key, value)| labels.get(key).map(|v| v == value).unwrap_or(false))
}
