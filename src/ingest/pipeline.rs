//! Stream processor
//!
//! Validates, buffers, and batch-flushes ingested metrics into storage.
//! Flushes are triggered by batch size, by a full buffer, and by a
//! background timer; a flush swaps the buffer under its lock and issues
//! storage writes without holding it. Lifecycle is
//! `stopped → running → stopped` and restart from stopped is allowed.

use crate::ingest::validator::{ValidationError, Validator, ValidatorConfig};
use crate::storage::error::StorageResult;
use crate::storage::types::Labels;
use crate::storage::{HotStore, StorageEngine};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// An incoming metric sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    /// Unix timestamp in nanoseconds
    pub timestamp: i64,
    #[serde(default)]
    pub labels: Labels,
}

/// Seam between ingestion and storage: anything that accepts points.
pub trait StorageWriter: Send + Sync {
    fn add_point(
        &self,
        series_id: &str,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> StorageResult<()>;
}

impl StorageWriter for StorageEngine {
    fn add_point(
        &self,
        series_id: &str,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> StorageResult<()> {
        StorageEngine::add_point(self, series_id, labels, timestamp, value)
    }
}

impl StorageWriter for HotStore {
    fn add_point(
        &self,
        series_id: &str,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> StorageResult<()> {
        HotStore::add_point(self, series_id, labels, timestamp, value)
    }
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Metric rejected by the validator
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Buffer still full after a synchronous flush attempt
    #[error("buffer full, metric dropped")]
    BackpressureDropped,

    /// Pipeline is stopped
    #[error("stream processor not running")]
    NotRunning,

    /// Pipeline already started
    #[error("stream processor already running")]
    AlreadyRunning,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard bound on buffered metrics
    pub buffer_capacity: usize,
    /// Flush once this many metrics are buffered
    pub batch_size: usize,
    /// Background flush cadence
    pub flush_interval: Duration,
    pub validation: ValidatorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            validation: ValidatorConfig::default(),
        }
    }
}

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    batches: AtomicU64,
}

/// The ingestion stream processor.
pub struct StreamProcessor {
    storage: Arc<dyn StorageWriter>,
    validator: Validator,
    buffer: Mutex<Vec<MetricPoint>>,
    buffer_capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
    running: AtomicBool,
    stop: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl StreamProcessor {
    pub fn new(storage: Arc<dyn StorageWriter>, config: PipelineConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            storage,
            validator: Validator::new(config.validation),
            buffer: Mutex::new(Vec::with_capacity(config.buffer_capacity)),
            buffer_capacity: config.buffer_capacity.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            running: AtomicBool::new(false),
            stop,
            flusher: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Start the background flusher. Fails when already running.
    pub fn start(self: &Arc<Self>) -> Result<(), IngestError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IngestError::AlreadyRunning);
        }
        self.stop.send_replace(false);

        let processor = Arc::clone(self);
        let mut stop = self.stop.subscribe();
        let period = self.flush_interval;

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => processor.flush(),
                }
            }
        });

        *self.flusher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!("stream processor started");
        Ok(())
    }

    /// Stop the pipeline: halt the flusher, drain its current iteration,
    /// and flush whatever is still buffered. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop.send(true);

        let handle = self.flusher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.flush();
        tracing::info!("stream processor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Convenience entry mirroring the external `submit` operation.
    pub fn submit(
        &self,
        name: &str,
        labels: Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<(), IngestError> {
        self.ingest_one(MetricPoint {
            name: name.to_string(),
            value,
            timestamp,
            labels,
        })
    }

    /// Validate and buffer one metric, flushing synchronously when the
    /// buffer or batch threshold is reached.
    pub fn ingest_one(&self, metric: MetricPoint) -> Result<(), IngestError> {
        if let Err(e) = self.validator.validate(&metric) {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        if !self.is_running() {
            return Err(IngestError::NotRunning);
        }

        let buffered = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.len() >= self.buffer_capacity {
                drop(buffer);
                self.flush();
                buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
                if buffer.len() >= self.buffer_capacity {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(IngestError::BackpressureDropped);
                }
            }
            buffer.push(metric);
            self.counters.ingested.fetch_add(1, Ordering::Relaxed);
            buffer.len()
        };

        if buffered >= self.batch_size {
            self.flush();
        }

        Ok(())
    }

    /// Ingest a batch; per-item failures are logged and counted but do not
    /// abort the rest. Returns the number of metrics accepted.
    pub fn ingest_batch(&self, metrics: Vec<MetricPoint>) -> usize {
        let mut accepted = 0;
        for metric in metrics {
            let name = metric.name.clone();
            match self.ingest_one(metric) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::warn!(metric = %name, error = %e, "dropped metric from batch");
                }
            }
        }
        accepted
    }

    /// Swap the buffer for an empty one and write its contents to storage.
    pub fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        tracing::debug!(points = batch.len(), "flushing ingestion buffer");

        for metric in batch {
            match self
                .storage
                .add_point(&metric.name, &metric.labels, metric.timestamp, metric.value)
            {
                Ok(()) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(metric = %metric.name, error = %e, "failed to store metric");
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Current processing statistics.
    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            buffer_depth: self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len(),
            running: self.is_running(),
        }
    }
}

/// Ingestion statistics
#[derive(Debug, Clone, Serialize)]
pub struct IngestionStats {
    pub ingested: u64,
    pub processed: u64,
    pub errors: u64,
    pub batches: u64,
    pub buffer_depth: usize,
    pub running: bool,
}

impl std::fmt::Display for IngestionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ingested: {}, processed: {}, errors: {}, batches: {}, buffered: {}, running: {}",
            self.ingested, self.processed, self.errors, self.batches, self.buffer_depth, self.running
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::now_nanos;

    fn metric(name: &str, value: f64) -> MetricPoint {
        MetricPoint {
            name: name.to_string(),
            value,
            timestamp: now_nanos(),
            labels: Labels::new(),
        }
    }

    fn processor(config: PipelineConfig) -> (Arc<StreamProcessor>, Arc<HotStore>) {
        let store = Arc::new(HotStore::new(1000, 10_000));
        let processor = Arc::new(StreamProcessor::new(store.clone(), config));
        (processor, store)
    }

    #[tokio::test]
    async fn ingest_flows_to_storage_on_flush() {
        let (processor, store) = processor(PipelineConfig::default());
        processor.start().unwrap();

        processor.ingest_one(metric("cpu", 1.0)).unwrap();
        assert_eq!(store.total_points(), 0);

        processor.flush();
        assert_eq!(store.total_points(), 1);

        let stats = processor.stats();
        assert_eq!(stats.ingested, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.buffer_depth, 0);

        processor.stop().await;
    }

    #[tokio::test]
    async fn batch_size_triggers_flush() {
        let (processor, store) = processor(PipelineConfig {
            batch_size: 3,
            ..Default::default()
        });
        processor.start().unwrap();

        for i in 0..3 {
            processor.ingest_one(metric("cpu", i as f64)).unwrap();
        }
        assert_eq!(store.total_points(), 3);
        assert_eq!(processor.stats().buffer_depth, 0);

        processor.stop().await;
    }

    #[tokio::test]
    async fn validation_failure_counts_error_and_rejects() {
        let (processor, store) = processor(PipelineConfig::default());
        processor.start().unwrap();

        let err = processor.ingest_one(metric("cpu", f64::NAN)).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert_eq!(processor.stats().errors, 1);
        assert_eq!(processor.stats().ingested, 0);
        assert_eq!(store.total_points(), 0);

        processor.stop().await;
    }

    #[tokio::test]
    async fn ingest_while_stopped_is_rejected() {
        let (processor, _) = processor(PipelineConfig::default());
        let err = processor.ingest_one(metric("cpu", 1.0)).unwrap_err();
        assert!(matches!(err, IngestError::NotRunning));
    }

    #[tokio::test]
    async fn double_start_is_rejected_and_restart_allowed() {
        let (processor, _) = processor(PipelineConfig::default());

        processor.start().unwrap();
        assert!(matches!(
            processor.start(),
            Err(IngestError::AlreadyRunning)
        ));

        processor.stop().await;
        assert!(!processor.is_running());

        // Restart from stopped is allowed.
        processor.start().unwrap();
        processor.ingest_one(metric("cpu", 1.0)).unwrap();
        processor.stop().await;
    }

    #[tokio::test]
    async fn stop_performs_final_flush() {
        let (processor, store) = processor(PipelineConfig::default());
        processor.start().unwrap();

        processor.ingest_one(metric("cpu", 1.0)).unwrap();
        processor.stop().await;

        assert_eq!(store.total_points(), 1);
    }

    #[tokio::test]
    async fn full_buffer_flushes_synchronously() {
        let (processor, store) = processor(PipelineConfig {
            buffer_capacity: 5,
            batch_size: 100, // batch trigger out of the way
            ..Default::default()
        });
        processor.start().unwrap();

        for i in 0..12 {
            processor.ingest_one(metric("cpu", i as f64)).unwrap();
        }

        // Two capacity-triggered flushes happened along the way.
        assert!(store.total_points() >= 10);
        assert_eq!(processor.stats().ingested, 12);

        processor.stop().await;
    }

    #[tokio::test]
    async fn background_flusher_drains_buffer() {
        let (processor, store) = processor(PipelineConfig {
            flush_interval: Duration::from_millis(10),
            ..Default::default()
        });
        processor.start().unwrap();

        processor.ingest_one(metric("cpu", 1.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.total_points(), 1);
        processor.stop().await;
    }

    #[tokio::test]
    async fn batch_ingest_continues_past_failures() {
        let (processor, store) = processor(PipelineConfig::default());
        processor.start().unwrap();

        let accepted = processor.ingest_batch(vec![
            metric("a", 1.0),
            metric("b", f64::INFINITY),
            metric("c", 3.0),
        ]);

        assert_eq!(accepted, 2);
        processor.flush();
        assert_eq!(store.total_points(), 2);
        assert_eq!(processor.stats().errors, 1);

        processor.stop().await;
    }

    #[tokio::test]
    async fn storage_failures_count_as_errors() {
        // A store with a cardinality cap of 1 rejects the second series.
        let store = Arc::new(HotStore::new(1, 10));
        let processor = Arc::new(StreamProcessor::new(
            store.clone(),
            PipelineConfig::default(),
        ));
        processor.start().unwrap();

        processor.ingest_one(metric("a", 1.0)).unwrap();
        processor.ingest_one(metric("b", 2.0)).unwrap();
        processor.flush();

        let stats = processor.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.errors, 1);

        processor.stop().await;
    }
}
