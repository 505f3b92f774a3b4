//! # Meridian
//!
//! A time-series analytics kernel for numeric metric streams (telemetry,
//! infrastructure monitoring, financial ticks). Meridian ingests labeled,
//! timestamped floating-point samples at high throughput, keeps a recent
//! window in a fast in-memory tier, spills aged series to a compressed
//! on-disk tier, answers range and aggregation queries across both tiers,
//! and produces online anomaly verdicts and short-horizon forecasts over
//! the same data.
//!
//! ## Modules
//!
//! - [`storage`]: hot (in-memory) and warm (on-disk) tiers, tiering and
//!   cleanup controllers, cross-tier range queries
//! - [`ingest`]: validated, buffered, batch-flushed metric ingestion
//! - [`analytics`]: per-series anomaly detectors and forecasters
//! - [`config`]: typed configuration with TOML + environment loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meridian::config::Config;
//! use meridian::ingest::StreamProcessor;
//! use meridian::storage::{now_nanos, StorageEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     let engine = Arc::new(StorageEngine::new(config.storage.engine_config())?);
//!     engine.start();
//!
//!     let pipeline = Arc::new(StreamProcessor::new(
//!         engine.clone(),
//!         config.ingestion.pipeline_config(),
//!     ));
//!     pipeline.start()?;
//!
//!     pipeline.submit("cpu.usage", Default::default(), now_nanos(), 42.0)?;
//!
//!     pipeline.stop().await;
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod config;
pub mod ingest;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Aggregation, HotStore, RangeResult, Sample, Series, SeriesInfo, StorageEngine, StorageError,
    StorageResult, StorageStats, WarmStore,
};

pub use ingest::{
    IngestError, IngestionStats, MetricPoint, StorageWriter, StreamProcessor, ValidationError,
    Validator,
};

pub use analytics::{
    AnalyticsEngine, AnalyticsError, AnomalyResult, DetectorKind, Forecast, ForecastKind,
    ForecastPoint,
};

pub use config::{Config, ConfigError};
