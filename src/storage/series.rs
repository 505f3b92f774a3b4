//! A single time series: an ordered, deduplicated list of samples
//!
//! Points are kept sorted ascending by timestamp with no duplicate
//! timestamps; writing an existing timestamp overwrites its value
//! (last-write-wins). A reader-writer lock guards the point list and
//! readers receive owned copies, so a range copy observes a consistent
//! snapshot while appends continue.

use crate::storage::types::{now_nanos, Aggregation, Labels, Sample, SeriesInfo};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

/// A named, label-bearing, time-ordered sequence of samples.
#[derive(Debug)]
pub struct Series {
    id: String,
    /// Labels are immutable after creation; later differing labels on
    /// incoming writes are silently ignored.
    labels: Labels,
    points: RwLock<Vec<Sample>>,
    /// Unix nanoseconds of the most recent write
    last_seen: AtomicI64,
}

impl Series {
    pub fn new(id: impl Into<String>, labels: Labels) -> Self {
        Self {
            id: id.into(),
            labels,
            points: RwLock::new(Vec::new()),
            last_seen: AtomicI64::new(now_nanos()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Unix nanoseconds of the most recent write.
    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Acquire)
    }

    /// Insert a sample respecting sort order.
    ///
    /// A sample with an identical timestamp overwrites the existing value.
    /// Returns `true` when a new point was inserted, `false` on overwrite.
    pub fn append(&self, timestamp: i64, value: f64) -> bool {
        let inserted = {
            let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
            Self::insert_sorted(&mut points, timestamp, value)
        };
        self.last_seen.store(now_nanos(), Ordering::Release);
        inserted
    }

    /// Insert a sample, evicting the oldest point when the series would
    /// exceed `max_points`.
    ///
    /// Returns `true` when the series grew by one point (a true insert
    /// without eviction), which is when the owning store's total counter
    /// must be bumped.
    pub fn append_bounded(&self, timestamp: i64, value: f64, max_points: usize) -> bool {
        let grew = {
            let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
            let inserted = Self::insert_sorted(&mut points, timestamp, value);
            if inserted && points.len() > max_points {
                points.remove(0);
                false
            } else {
                inserted
            }
        };
        self.last_seen.store(now_nanos(), Ordering::Release);
        grew
    }

    fn insert_sorted(points: &mut Vec<Sample>, timestamp: i64, value: f64) -> bool {
        match points.binary_search_by_key(&timestamp, |s| s.timestamp) {
            Ok(pos) => {
                points[pos].value = value;
                false
            }
            Err(pos) => {
                points.insert(pos, Sample::new(timestamp, value));
                true
            }
        }
    }

    /// Return a copy of all samples in the closed interval `[start, end]`.
    ///
    /// `start > end` yields an empty result.
    pub fn range(&self, start: i64, end: i64) -> Vec<Sample> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        let lo = points.partition_point(|s| s.timestamp < start);
        let hi = points.partition_point(|s| s.timestamp <= end);
        if lo >= hi {
            return Vec::new();
        }
        points[lo..hi].to_vec()
    }

    /// Return up to `count` most recent samples in ascending timestamp order.
    pub fn latest(&self, count: usize) -> Vec<Sample> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        if count == 0 || points.is_empty() {
            return Vec::new();
        }
        let start = points.len().saturating_sub(count);
        points[start..].to_vec()
    }

    /// Return a copy of every sample.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.points
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current sample count.
    pub fn len(&self) -> usize {
        self.points.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every sample with timestamp ≤ `through`; returns the number
    /// removed. Used after a tiering pass has persisted those points.
    pub fn drain_through(&self, through: i64) -> usize {
        let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
        let cut = points.partition_point(|s| s.timestamp <= through);
        points.drain(..cut);
        cut
    }

    /// Apply an aggregation over the closed interval `[start, end]`.
    pub fn aggregate(&self, start: i64, end: i64, agg: Aggregation) -> f64 {
        agg.apply(&self.range(start, end))
    }

    /// Metadata snapshot for listings.
    pub fn info(&self) -> SeriesInfo {
        SeriesInfo {
            id: self.id.clone(),
            labels: self.labels.clone(),
            size: self.len(),
            last_seen: self.last_seen(),
        }
    }
}
