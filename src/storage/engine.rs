//! Multi-tier storage engine
//!
//! Coordinates the hot and warm tiers: routes writes to the hot tier,
//! merges range reads across both tiers (hot wins on duplicate
//! timestamps), and runs the background controllers. Tiering moves idle
//! hot series into warm blocks and trims the persisted points from hot,
//! cleanup drops stale hot series and expired warm files, and compaction
//! coalesces fragmented warm files. Each controller can also be triggered
//! manually for test and admin paths.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::hot::HotStore;
use crate::storage::series::Series;
use crate::storage::types::{now_nanos, Labels, Sample, SeriesInfo};
use crate::storage::warm::{WarmConfig, WarmStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hot tier series cardinality cap
    pub max_series: usize,
    /// Hot tier per-series depth cap
    pub max_points_per_series: usize,
    /// Hot series idle longer than this are tiered and eventually cleaned
    pub hot_retention: Duration,
    /// Cadence of the cleanup controller
    pub cleanup_interval: Duration,
    /// Cadence of the tiering controller
    pub tiering_interval: Duration,
    /// Cadence of warm compaction
    pub compaction_interval: Duration,
    /// Warm tier configuration; `None` disables the warm tier
    pub warm: Option<WarmConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_series: 100_000,
            max_points_per_series: 10_000,
            hot_retention: Duration::from_secs(6 * 3600),
            cleanup_interval: Duration::from_secs(30 * 60),
            tiering_interval: Duration::from_secs(15 * 60),
            compaction_interval: Duration::from_secs(6 * 3600),
            warm: Some(WarmConfig::default()),
        }
    }
}

/// Result of a cross-tier range query.
///
/// When the warm tier fails mid-read, `samples` still carries the hot-tier
/// data and `warm_error` reports the failure instead of silently dropping
/// it.
#[derive(Debug)]
pub struct RangeResult {
    /// Merged samples, sorted ascending, deduplicated by nanosecond
    /// timestamp with hot winning over warm
    pub samples: Vec<Sample>,
    /// Set when the warm tier read failed; `samples` is then hot-only
    pub warm_error: Option<StorageError>,
}

impl RangeResult {
    pub fn is_degraded(&self) -> bool {
        self.warm_error.is_some()
    }
}

/// The multi-tier storage engine.
pub struct StorageEngine {
    hot: Arc<HotStore>,
    warm: Option<Arc<WarmStore>>,
    config: EngineConfig,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageEngine {
    /// Create an engine, opening (and scanning) the warm tier when enabled.
    pub fn new(config: EngineConfig) -> StorageResult<Self> {
        let hot = Arc::new(HotStore::new(
            config.max_series,
            config.max_points_per_series,
        ));
        let warm = match &config.warm {
            Some(warm_config) => Some(Arc::new(WarmStore::open(warm_config.clone())?)),
            None => None,
        };
        let (stop, _) = watch::channel(false);

        Ok(Self {
            hot,
            warm,
            config,
            stop,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Write a sample. All ingestion lands in the hot tier first.
    pub fn add_point(
        &self,
        series_id: &str,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> StorageResult<()> {
        self.hot.add_point(series_id, labels, timestamp, value)
    }

    /// Look up a hot series by id.
    pub fn get_series(&self, series_id: &str) -> Option<Arc<Series>> {
        self.hot.get_series(series_id)
    }

    /// Like [`Self::get_series`], failing with `NotFound` for callers
    /// that surface the error (range reads instead return empty).
    pub fn require_series(&self, series_id: &str) -> StorageResult<Arc<Series>> {
        self.get_series(series_id)
            .ok_or_else(|| StorageError::NotFound(series_id.to_string()))
    }

    /// Hot series matching every (key, value) pair in `filters`.
    pub fn series_by_labels(&self, filters: &Labels) -> Vec<Arc<Series>> {
        self.hot.series_by_labels(filters)
    }

    /// Metadata for hot series matching `filters`.
    pub fn list_series(&self, filters: &Labels) -> Vec<SeriesInfo> {
        self.hot.list_series(filters)
    }

    /// Read the closed interval `[start, end]` across both tiers.
    ///
    /// An absent series yields an empty result, not an error. A warm-tier
    /// failure degrades the result to hot-only data plus the error.
    pub fn get_range(&self, series_id: &str, start: i64, end: i64) -> RangeResult {
        let hot_points = self
            .hot
            .get_series(series_id)
            .map(|s| s.range(start, end))
            .unwrap_or_default();

        let (warm_points, warm_error) = match &self.warm {
            Some(warm) => match warm.read_range(series_id, start, end) {
                Ok(points) => (points, None),
                Err(e) => {
                    tracing::error!(series_id, error = %e, "warm tier read failed");
                    (Vec::new(), Some(e))
                }
            },
            None => (Vec::new(), None),
        };

        RangeResult {
            samples: merge_tiers(hot_points, warm_points),
            warm_error,
        }
    }

    /// Aggregate the closed interval `[start, end]` across both tiers.
    ///
    /// Operates on the merged, deduplicated sample set; a degraded warm
    /// read surfaces through the returned [`RangeResult::warm_error`] of
    /// [`Self::get_range`], so callers needing that signal should query
    /// the range themselves and aggregate the samples.
    pub fn aggregate_range(
        &self,
        series_id: &str,
        start: i64,
        end: i64,
        agg: crate::storage::types::Aggregation,
    ) -> f64 {
        agg.apply(&self.get_range(series_id, start, end).samples)
    }

    /// Direct access to the warm tier, when enabled. Used by maintenance
    /// paths and tests; queries should go through [`Self::get_range`].
    pub fn warm_store(&self) -> Option<Arc<WarmStore>> {
        self.warm.clone()
    }

    /// Snapshot of storage usage across tiers.
    pub fn storage_stats(&self) -> StorageStats {
        StorageStats {
            hot_series_count: self.hot.series_count(),
            hot_total_points: self.hot.total_points(),
            warm_series_count: self.warm.as_ref().map(|w| w.series_count()).unwrap_or(0),
            warm_file_count: self.warm.as_ref().map(|w| w.file_count()).unwrap_or(0),
            warm_total_bytes: self.warm.as_ref().map(|w| w.total_bytes()).unwrap_or(0),
        }
    }

    /// Move every idle hot series (no write within the hot retention
    /// period) into a warm block, then trim the persisted points from hot.
    /// Returns the number of series tiered.
    pub fn trigger_tiering(&self) -> StorageResult<usize> {
        let Some(warm) = &self.warm else {
            return Err(StorageError::InvalidArgument(
                "warm tier is disabled".to_string(),
            ));
        };

        let cutoff = now_nanos() - self.config.hot_retention.as_nanos() as i64;
        let mut tiered = 0;

        for series in self.hot.series_by_labels(&Labels::new()) {
            if series.last_seen() >= cutoff {
                continue;
            }
            let points = series.snapshot();
            let Some(last) = points.last() else {
                continue;
            };

            warm.write(series.id(), series.labels(), &points)?;
            // The block is durable; drop the persisted points from hot. A
            // crash between these two steps only leaves a read-time overlap,
            // which the merge dedupe resolves.
            self.hot.drain_tiered(series.id(), last.timestamp);
            tiered += 1;
        }

        if tiered > 0 {
            tracing::info!(tiered, "tiered idle series to warm storage");
        }
        Ok(tiered)
    }

    /// Drop stale hot series, then expired warm files. Returns
    /// `(hot_removed, warm_removed)`.
    pub fn trigger_cleanup(&self) -> StorageResult<(usize, usize)> {
        let hot_removed = self.hot.cleanup_stale(self.config.hot_retention);
        let warm_removed = match &self.warm {
            Some(warm) => warm.cleanup_expired()?,
            None => 0,
        };
        Ok((hot_removed, warm_removed))
    }

    /// Compact fragmented warm files. Returns the number compacted.
    pub fn trigger_compaction(&self) -> StorageResult<usize> {
        match &self.warm {
            Some(warm) => warm.compact(),
            None => Ok(0),
        }
    }

    /// Start the background controllers.
    pub fn start(self: &Arc<Self>) {
        self.stop.send_replace(false);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        tasks.push(self.spawn_loop("cleanup", self.config.cleanup_interval, |engine| {
            if let Err(e) = engine.trigger_cleanup() {
                tracing::error!(error = %e, "cleanup pass failed");
            }
        }));

        if self.warm.is_some() {
            tasks.push(self.spawn_loop("tiering", self.config.tiering_interval, |engine| {
                if let Err(e) = engine.trigger_tiering() {
                    tracing::error!(error = %e, "tiering pass failed");
                }
            }));
            tasks.push(
                self.spawn_loop("compaction", self.config.compaction_interval, |engine| {
                    if let Err(e) = engine.trigger_compaction() {
                        tracing::error!(error = %e, "compaction pass failed");
                    }
                }),
            );
        }
    }

    fn spawn_loop<F>(self: &Arc<Self>, name: &'static str, period: Duration, op: F) -> JoinHandle<()>
    where
        F: Fn(&StorageEngine) + Send + 'static,
    {
        let engine = Arc::clone(self);
        let mut stop = self.stop.subscribe();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => op(&engine),
                }
            }
            tracing::debug!(task = name, "storage controller stopped");
        })
    }

    /// Stop the background controllers, draining the current iteration.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Merge two per-tier results into one ascending, deduplicated sequence.
///
/// Duplicate nanosecond timestamps collapse with hot taking precedence
/// over warm; hot reflects the more recent write.
fn merge_tiers(hot: Vec<Sample>, warm: Vec<Sample>) -> Vec<Sample> {
    if hot.is_empty() {
        return warm;
    }
    if warm.is_empty() {
        return hot;
    }

    let mut merged: BTreeMap<i64, f64> = BTreeMap::new();
    for sample in warm {
        merged.insert(sample.timestamp, sample.value);
    }
    for sample in hot {
        merged.insert(sample.timestamp, sample.value);
    }

    merged
        .into_iter()
        .map(|(timestamp, value)| Sample { timestamp, value })
        .collect()
}

/// Storage usage across tiers
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub hot_series_count: usize,
    pub hot_total_points: u64,
    pub warm_series_count: usize,
    pub warm_file_count: usize,
    pub warm_total_bytes: u64,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hot: {} series / {} points, warm: {} series / {} files / {:.2} MB",
            self.hot_series_count,
            self.hot_total_points,
            self.warm_series_count,
            self.warm_file_count,
            self.warm_total_bytes as f64 / (1024.0 * 1024.0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::NANOS_PER_SEC;
    use tempfile::tempdir;

    fn engine_at(dir: &std::path::Path) -> StorageEngine {
        let config = EngineConfig {
            warm: Some(WarmConfig {
                data_path: dir.to_path_buf(),
                ..Default::default()
            }),
            ..Default::default()
        };
        StorageEngine::new(config).unwrap()
    }

    #[test]
    fn hot_only_engine_works() {
        let config = EngineConfig {
            warm: None,
            ..Default::default()
        };
        let engine = StorageEngine::new(config).unwrap();
        engine.add_point("cpu", &Labels::new(), 0, 1.0).unwrap();

        let result = engine.get_range("cpu", 0, i64::MAX);
        assert_eq!(result.samples.len(), 1);
        assert!(!result.is_degraded());

        assert!(matches!(
            engine.trigger_tiering(),
            Err(StorageError::InvalidArgument(_))
        ));
        assert_eq!(engine.trigger_compaction().unwrap(), 0);
    }

    #[test]
    fn require_series_distinguishes_absence() {
        let config = EngineConfig {
            warm: None,
            ..Default::default()
        };
        let engine = StorageEngine::new(config).unwrap();
        engine.add_point("cpu", &Labels::new(), 0, 1.0).unwrap();

        assert!(engine.require_series("cpu").is_ok());
        assert!(matches!(
            engine.require_series("mem"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn absent_series_reads_empty_not_error() {
        let dir = tempdir().unwrap();
        let engine = engine_at(dir.path());

        let result = engine.get_range("nope", 0, i64::MAX);
        assert!(result.samples.is_empty());
        assert!(result.warm_error.is_none());
    }

    #[test]
    fn merge_prefers_hot_on_duplicate_timestamps() {
        let t = 1_000 * NANOS_PER_SEC;
        let hot = vec![Sample::new(t, 7.0)];
        let warm = vec![Sample::new(t, 5.0), Sample::new(t - 1, 4.0)];

        let merged = merge_tiers(hot, warm);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1], Sample::new(t, 7.0));
    }

    #[test]
    fn merge_returns_single_tier_verbatim() {
        let points = vec![Sample::new(0, 1.0)];
        assert_eq!(merge_tiers(points.clone(), Vec::new()), points);
        assert_eq!(merge_tiers(Vec::new(), points.clone()), points);
    }

    #[test]
    fn tiering_moves_idle_series_and_trims_hot() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig {
            warm: Some(WarmConfig {
                data_path: dir.path().to_path_buf(),
                ..Default::default()
            }),
            ..Default::default()
        };
        config.hot_retention = Duration::from_nanos(1);
        let engine = StorageEngine::new(config).unwrap();

        for i in 0..10 {
            engine
                .add_point("cpu", &Labels::new(), i * NANOS_PER_SEC, i as f64)
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(engine.trigger_tiering().unwrap(), 1);

        // Hot copy is gone, warm copy answers the same query.
        let stats = engine.storage_stats();
        assert_eq!(stats.hot_series_count, 0);
        assert_eq!(stats.hot_total_points, 0);
        assert_eq!(stats.warm_series_count, 1);

        let result = engine.get_range("cpu", 0, i64::MAX);
        assert_eq!(result.samples.len(), 10);
        assert!(!result.is_degraded());
    }

    #[test]
    fn tier_merge_is_idempotent_across_placement() {
        let dir = tempdir().unwrap();
        let engine = engine_at(dir.path());
        let t = 500 * NANOS_PER_SEC;

        // Same sample in both tiers: warm first, then hot overwrite.
        engine
            .warm
            .as_ref()
            .unwrap()
            .write("cpu", &Labels::new(), &[Sample::new(t, 5.0)])
            .unwrap();
        engine.add_point("cpu", &Labels::new(), t, 7.0).unwrap();

        let result = engine.get_range("cpu", t - NANOS_PER_SEC, t + NANOS_PER_SEC);
        assert_eq!(result.samples, vec![Sample::new(t, 7.0)]);
    }

    #[test]
    fn warm_failure_degrades_to_hot_only() {
        let dir = tempdir().unwrap();
        let engine = engine_at(dir.path());
        let t = 500 * NANOS_PER_SEC;

        engine
            .warm
            .as_ref()
            .unwrap()
            .write("cpu", &Labels::new(), &[Sample::new(t, 5.0)])
            .unwrap();
        engine.add_point("cpu", &Labels::new(), t + 1, 7.0).unwrap();

        // Pull the file out from under the store.
        std::fs::remove_file(dir.path().join("cpu.tsw")).unwrap();

        let result = engine.get_range("cpu", 0, i64::MAX);
        assert!(result.is_degraded());
        assert_eq!(result.samples, vec![Sample::new(t + 1, 7.0)]);
    }

    #[test]
    fn aggregate_spans_both_tiers() {
        use crate::storage::types::Aggregation;

        let dir = tempdir().unwrap();
        let engine = engine_at(dir.path());
        let t = 1_000 * NANOS_PER_SEC;

        engine
            .warm
            .as_ref()
            .unwrap()
            .write(
                "cpu",
                &Labels::new(),
                &[Sample::new(t, 10.0), Sample::new(t + 1, 20.0)],
            )
            .unwrap();
        engine.add_point("cpu", &Labels::new(), t + 2, 30.0).unwrap();

        assert_eq!(
            engine.aggregate_range("cpu", t, t + 2, Aggregation::Sum),
            60.0
        );
        assert_eq!(
            engine.aggregate_range("cpu", t, t + 2, Aggregation::Avg),
            20.0
        );
        // Empty window keeps the aggregator's empty semantics.
        assert!(engine
            .aggregate_range("cpu", 0, NANOS_PER_SEC, Aggregation::Max)
            .is_nan());
    }

    #[test]
    fn cleanup_reports_both_tiers() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig {
            warm: Some(WarmConfig {
                data_path: dir.path().to_path_buf(),
                retention: Duration::from_nanos(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        config.hot_retention = Duration::from_nanos(1);
        let engine = StorageEngine::new(config).unwrap();

        engine.add_point("hot_only", &Labels::new(), 0, 1.0).unwrap();
        engine
            .warm
            .as_ref()
            .unwrap()
            .write("warm_only", &Labels::new(), &[Sample::new(0, 1.0)])
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let (hot_removed, warm_removed) = engine.trigger_cleanup().unwrap();
        assert_eq!(hot_removed, 1);
        assert_eq!(warm_removed, 1);
    }

    #[test]
    fn stats_display_is_humane() {
        let stats = StorageStats {
            hot_series_count: 2,
            hot_total_points: 10,
            warm_series_count: 1,
            warm_file_count: 1,
            warm_total_bytes: 1024 * 1024,
        };
        assert_eq!(
            stats.to_string(),
            "hot: 2 series / 10 points, warm: 1 series / 1 files / 1.00 MB"
        );
    }

    #[tokio::test]
    async fn controllers_start_and_stop() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig {
            warm: Some(WarmConfig {
                data_path: dir.path().to_path_buf(),
                ..Default::default()
            }),
            ..Default::default()
        };
        config.hot_retention = Duration::from_nanos(1);
        config.tiering_interval = Duration::from_millis(10);
        // Keep the other controllers quiet so the stale hot series is
        // tiered rather than cleaned up first.
        config.cleanup_interval = Duration::from_secs(3600);
        config.compaction_interval = Duration::from_secs(3600);

        let engine = Arc::new(StorageEngine::new(config).unwrap());
        for i in 0..5 {
            engine
                .add_point("cpu", &Labels::new(), i * NANOS_PER_SEC, i as f64)
                .unwrap();
        }

        engine.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await;

        // The tiering loop fired and moved the idle series to warm.
        let stats = engine.storage_stats();
        assert_eq!(stats.warm_series_count, 1);
        assert_eq!(engine.get_range("cpu", 0, i64::MAX).samples.len(), 5);
    }
}
