//! In-memory hot tier
//!
//! Maps series ids to [`Series`] with a global cardinality cap and a
//! per-series depth cap. Handles are reference-counted (`Arc<Series>`) so
//! a caller holding one stays valid across concurrent cleanup.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::series::Series;
use crate::storage::types::{matches_labels, now_nanos, Labels, SeriesInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

struct HotInner {
    series: HashMap<String, Arc<Series>>,
    total_points: u64,
}

/// The in-memory hot storage tier.
pub struct HotStore {
    inner: RwLock<HotInner>,
    max_series: usize,
    max_points_per_series: usize,
}

impl HotStore {
    pub fn new(max_series: usize, max_points_per_series: usize) -> Self {
        Self {
            inner: RwLock::new(HotInner {
                series: HashMap::new(),
                total_points: 0,
            }),
            max_series,
            max_points_per_series,
        }
    }

    /// Single entry point for ingestion into the hot tier.
    ///
    /// Creates the series on first write (labels are recorded once, at
    /// creation). When the series is at its depth cap the oldest sample is
    /// evicted and the total counter stays unchanged; the counter is only
    /// bumped on true inserts, never on same-timestamp overwrites.
    pub fn add_point(
        &self,
        series_id: &str,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> StorageResult<()> {
        if series_id.is_empty() {
            return Err(StorageError::InvalidArgument("empty series id".to_string()));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let series = match inner.series.get(series_id) {
            Some(series) => series.clone(),
            None => {
                if inner.series.len() >= self.max_series {
                    return Err(StorageError::SeriesLimitExceeded(self.max_series));
                }
                let series = Arc::new(Series::new(series_id, labels.clone()));
                inner.series.insert(series_id.to_string(), series.clone());
                series
            }
        };

        if series.append_bounded(timestamp, value, self.max_points_per_series) {
            inner.total_points += 1;
        }

        Ok(())
    }

    /// Look up a series by id. The returned handle shares ownership and
    /// stays valid if cleanup later removes the series from the map.
    pub fn get_series(&self, series_id: &str) -> Option<Arc<Series>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.series.get(series_id).cloned()
    }

    /// Return every series whose labels contain all (key, value) pairs in
    /// `filters`. An empty filter map matches all series.
    pub fn series_by_labels(&self, filters: &Labels) -> Vec<Arc<Series>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .series
            .values()
            .filter(|s| matches_labels(s.labels(), filters))
            .cloned()
            .collect()
    }

    /// Metadata for every series matching `filters`.
    pub fn list_series(&self, filters: &Labels) -> Vec<SeriesInfo> {
        self.series_by_labels(filters)
            .iter()
            .map(|s| s.info())
            .collect()
    }

    pub fn series_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.series.len()
    }

    pub fn total_points(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.total_points
    }

    /// Remove every series whose last write is strictly older than
    /// `max_age`. Returns the number of series removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let cutoff = now_nanos() - max_age.as_nanos() as i64;

        let stale: Vec<String> = inner
            .series
            .iter()
            .filter(|(_, s)| s.last_seen() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(series) = inner.series.remove(id) {
                inner.total_points = inner.total_points.saturating_sub(series.len() as u64);
            }
        }

        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "cleaned up stale hot series");
        }
        stale.len()
    }

    /// Remove points with timestamp ≤ `through` from a series after they
    /// have been persisted to the warm tier; an emptied series is dropped
    /// from the map. Returns the number of points removed.
    pub fn drain_tiered(&self, series_id: &str, through: i64) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(series) = inner.series.get(series_id).cloned() else {
            return 0;
        };

        let removed = series.drain_through(through);
        inner.total_points = inner.total_points.saturating_sub(removed as u64);
        if series.is_empty() {
            inner.series.remove(series_id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::NANOS_PER_SEC;

    const MINUTE: i64 = 60 * NANOS_PER_SEC;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn add_point_creates_series_lazily() {
        let store = HotStore::new(10, 100);
        store
            .add_point("cpu.usage", &labels(&[("host", "s1")]), 0, 1.0)
            .unwrap();

        assert_eq!(store.series_count(), 1);
        assert_eq!(store.total_points(), 1);

        let series = store.get_series("cpu.usage").unwrap();
        assert_eq!(series.labels().get("host").unwrap(), "s1");
    }

    #[test]
    fn empty_id_is_rejected() {
        let store = HotStore::new(10, 100);
        let err = store.add_point("", &Labels::new(), 0, 1.0).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn cardinality_cap_is_enforced() {
        let store = HotStore::new(2, 100);
        store.add_point("a", &Labels::new(), 0, 1.0).unwrap();
        store.add_point("b", &Labels::new(), 0, 1.0).unwrap();

        let err = store.add_point("c", &Labels::new(), 0, 1.0).unwrap_err();
        assert!(matches!(err, StorageError::SeriesLimitExceeded(2)));

        // Existing series still writable at the cap.
        store.add_point("a", &Labels::new(), MINUTE, 2.0).unwrap();
    }

    #[test]
    fn depth_cap_evicts_oldest_and_keeps_counter() {
        let store = HotStore::new(10, 3);
        for i in 0..4 {
            store
                .add_point("s", &Labels::new(), i * MINUTE, i as f64)
                .unwrap();
        }

        let series = store.get_series("s").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.latest(1)[0].value, 3.0);
        assert_eq!(store.total_points(), 3);
    }

    #[test]
    fn overwrite_does_not_double_count() {
        let store = HotStore::new(10, 100);
        store.add_point("s", &Labels::new(), MINUTE, 1.0).unwrap();
        store.add_point("s", &Labels::new(), MINUTE, 2.0).unwrap();

        assert_eq!(store.total_points(), 1);
        assert_eq!(store.get_series("s").unwrap().len(), 1);
    }

    #[test]
    fn later_labels_are_ignored() {
        let store = HotStore::new(10, 100);
        store
            .add_point("s", &labels(&[("env", "prod")]), 0, 1.0)
            .unwrap();
        store
            .add_point("s", &labels(&[("env", "dev")]), MINUTE, 2.0)
            .unwrap();

        let series = store.get_series("s").unwrap();
        assert_eq!(series.labels().get("env").unwrap(), "prod");
    }

    #[test]
    fn label_filters_use_and_semantics() {
        let store = HotStore::new(10, 100);
        store
            .add_point("a", &labels(&[("host", "s1"), ("env", "prod")]), 0, 1.0)
            .unwrap();
        store
            .add_point("b", &labels(&[("host", "s1"), ("env", "dev")]), 0, 1.0)
            .unwrap();
        store
            .add_point("c", &labels(&[("host", "s2"), ("env", "prod")]), 0, 1.0)
            .unwrap();

        let matched = store.series_by_labels(&labels(&[("host", "s1"), ("env", "prod")]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id(), "a");

        assert_eq!(store.series_by_labels(&Labels::new()).len(), 3);
    }

    #[test]
    fn cleanup_stale_removes_idle_series() {
        let store = HotStore::new(10, 100);
        store.add_point("s", &Labels::new(), 0, 1.0).unwrap();
        store.add_point("t", &Labels::new(), 0, 1.0).unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(store.cleanup_stale(Duration::from_secs(3600)), 0);

        // Everything is older than zero.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.cleanup_stale(Duration::from_nanos(1)), 2);
        assert_eq!(store.series_count(), 0);
        assert_eq!(store.total_points(), 0);
    }

    #[test]
    fn handle_survives_cleanup() {
        let store = HotStore::new(10, 100);
        store.add_point("s", &Labels::new(), 0, 1.0).unwrap();

        let handle = store.get_series("s").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.cleanup_stale(Duration::from_nanos(1));

        assert!(store.get_series("s").is_none());
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn drain_tiered_trims_and_drops_empty() {
        let store = HotStore::new(10, 100);
        for i in 0..5 {
            store
                .add_point("s", &Labels::new(), i * MINUTE, i as f64)
                .unwrap();
        }

        assert_eq!(store.drain_tiered("s", 2 * MINUTE), 3);
        assert_eq!(store.total_points(), 2);
        assert_eq!(store.get_series("s").unwrap().len(), 2);

        assert_eq!(store.drain_tiered("s", i64::MAX), 2);
        assert!(store.get_series("s").is_none());
        assert_eq!(store.total_points(), 0);
    }
}
