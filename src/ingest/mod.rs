//! Metric ingestion
//!
//! The ingestion pipeline validates incoming metrics, buffers them, and
//! batch-flushes to storage on size or time triggers:
//!
//! ```text
//! submit → validate → bounded buffer → batcher → hot store writer
//! ```

pub mod pipeline;
pub mod validator;

pub use pipeline::{
    IngestError, IngestionStats, MetricPoint, PipelineConfig, StorageWriter, StreamProcessor,
};
pub use validator::{ValidationError, Validator, ValidatorConfig};
