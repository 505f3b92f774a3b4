//! Tiered time-series storage
//!
//! The storage layer keeps recent samples in an in-memory hot tier and
//! spills aged series to a compressed on-disk warm tier:
//!
//! - Write path: ingestion → [`HotStore`] → (tiering) → [`WarmStore`]
//! - Read path: [`StorageEngine::get_range`] merges both tiers, hot wins
//!   on duplicate timestamps
//!
//! ## Lock hierarchy
//!
//! Locks are always acquired in this order to avoid deadlock:
//!
//! 1. [`HotStore`] map lock (covers the id→series map and counters)
//! 2. per-[`Series`] reader-writer lock
//! 3. [`WarmStore`] map lock (covers the id→file map)
//! 4. per-file reader-writer lock (held during disk I/O)
//!
//! The ingestion buffer and analytics locks sit below all of these.

pub mod block;
pub mod engine;
pub mod error;
pub mod hot;
pub mod series;
pub mod types;
pub mod warm;

pub use block::BlockRecord;
pub use engine::{EngineConfig, RangeResult, StorageEngine, StorageStats};
pub use error::{StorageError, StorageResult};
pub use hot::HotStore;
pub use series::Series;
pub use types::{now_nanos, Aggregation, Labels, Sample, SeriesInfo, NANOS_PER_MILLI, NANOS_PER_SEC};
pub use warm::{IndexEntry, WarmConfig, WarmFileInfo, WarmStore};
