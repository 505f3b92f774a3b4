//! Statistics helpers shared by detectors and forecasters

use crate::storage::types::{Sample, NANOS_PER_SEC};

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1 divisor); 0 for fewer than two values.
pub fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Mean absolute deviation from `mean`; 0 for an empty slice.
pub fn mean_abs_deviation(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).abs()).sum::<f64>() / values.len() as f64
}

/// Percentile by linear interpolation over an ascending-sorted slice.
///
/// `index = p/100 · (n − 1)`, interpolating between the neighbouring
/// elements. Empty input yields 0; a single element yields itself.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }

    let index = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = index.floor() as usize;
    let hi = index.ceil() as usize;

    if lo == hi {
        return sorted[lo];
    }

    let weight = index - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Median interval between consecutive samples, in nanoseconds.
///
/// Used as the forecast step so predictions follow the series' native
/// cadence. Falls back to one minute when fewer than two points are given
/// or the median is non-positive.
pub fn median_interval_nanos(points: &[Sample]) -> i64 {
    const DEFAULT: i64 = 60 * NANOS_PER_SEC;

    if points.len() < 2 {
        return DEFAULT;
    }

    let mut deltas: Vec<f64> = points
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp) as f64)
        .collect();
    deltas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let median = percentile(&deltas, 50.0) as i64;
    if median > 0 {
        median
    } else {
        DEFAULT
    }
}
