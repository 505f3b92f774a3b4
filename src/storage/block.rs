//! Warm block record codec
//!
//! A warm block is a gzip-compressed JSON serialization of a
//! [`BlockRecord`]. JSON keeps the payload self-describing so labels and
//! schema can evolve without rewriting file indexes; the compression level
//! is configurable (1..=9).
//!
//! The 12-byte on-disk header that precedes each payload (start time in
//! whole milliseconds + compressed length) lives in [`crate::storage::warm`];
//! this module only handles the payload bytes. Payload timestamps keep full
//! nanosecond precision: the millisecond header is an index key, the
//! payload is the authoritative record.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, Sample, NANOS_PER_MILLI};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A contiguous slice of one series' samples, persisted as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockRecord {
    pub series_id: String,
    pub labels: Labels,
    /// Timestamp of the first point, nanoseconds
    pub start_time: i64,
    /// Timestamp of the last point, nanoseconds
    pub end_time: i64,
    pub count: usize,
    pub points: Vec<Sample>,
}

impl BlockRecord {
    /// Build a record from a non-empty, ascending-sorted point slice.
    pub fn from_points(series_id: &str, labels: &Labels, points: &[Sample]) -> StorageResult<Self> {
        if points.is_empty() {
            return Err(StorageError::InvalidArgument(
                "block points must be non-empty".to_string(),
            ));
        }
        if points.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return Err(StorageError::InvalidArgument(
                "block points must be sorted ascending by timestamp".to_string(),
            ));
        }

        Ok(Self {
            series_id: series_id.to_string(),
            labels: labels.clone(),
            start_time: points[0].timestamp,
            end_time: points[points.len() - 1].timestamp,
            count: points.len(),
            points: points.to_vec(),
        })
    }

    /// The block's header index key: start time in whole milliseconds.
    pub fn start_time_millis(&self) -> i64 {
        self.start_time.div_euclid(NANOS_PER_MILLI)
    }
}

/// Serialize and compress a block record at the given gzip level (1..=9).
pub fn encode_block(record: &BlockRecord, level: u32) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec(record)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(&json)
        .map_err(|e| StorageError::Codec(format!("gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Codec(format!("gzip finish failed: {}", e)))
}

/// Decompress and deserialize a block payload.
pub fn decode_block(data: &[u8]) -> StorageResult<BlockRecord> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| StorageError::Codec(format!("gzip decompression failed: {}", e)))?;

    Ok(serde_json::from_slice(&json)?)
}
