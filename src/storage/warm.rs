//! On-disk warm tier
//!
//! One append-only block file per series, named `<series_id>.<suffix>`.
//!
//! Layout:
//! ```text
//! file  := block*
//! block := header payload
//! header := timestamp:int64_le  length:int32_le   // 12 bytes
//! payload := length bytes of gzip-compressed block record
//! ```
//!
//! The header timestamp is the block's start time in whole milliseconds
//! since the Unix epoch; payload timestamps keep nanosecond precision. The
//! fixed header permits fast linear index reconstruction on startup without
//! decompressing any block.
//!
//! Crash discipline: header and payload are fsynced before the in-memory
//! index entry is inserted. On startup a truncated trailing block is
//! ignored; a corrupt region before a valid prefix causes the file to be
//! logged and skipped, never deleted.

use crate::storage::block::{decode_block, encode_block, BlockRecord};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Labels, Sample, NANOS_PER_MILLI};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

/// Size of the per-block header: start-time millis (8) + length (4).
const BLOCK_HEADER_LEN: u64 = 12;

/// Warm tier configuration
#[derive(Debug, Clone)]
pub struct WarmConfig {
    /// Directory holding one block file per series
    pub data_path: PathBuf,
    /// File name suffix (without the dot)
    pub file_suffix: String,
    /// Advisory per-file size bound in bytes; exceeding it is logged
    pub max_file_size: u64,
    /// Gzip level, 1..=9
    pub compression_level: u32,
    /// Files whose last write is older than this are deleted by cleanup
    pub retention: Duration,
    /// Compact a file once its index grows past this many blocks
    pub compaction_threshold: usize,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data/warm"),
            file_suffix: "tsw".to_string(),
            max_file_size: 100 * 1024 * 1024,
            compression_level: 6,
            retention: Duration::from_secs(30 * 24 * 3600),
            compaction_threshold: 100,
        }
    }
}

/// Index entry addressing one compressed block on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Block start time in whole milliseconds (the header key)
    pub timestamp: i64,
    /// Byte position of the block header relative to file start
    pub offset: u64,
    /// Compressed payload length in bytes
    pub length: u32,
}

struct FileState {
    size: u64,
    last_modified: SystemTime,
    /// Sorted ascending by `timestamp`; equal keys keep append order
    index: Vec<IndexEntry>,
}

/// A single warm storage file for one series.
pub struct WarmFile {
    series_id: String,
    path: PathBuf,
    state: RwLock<FileState>,
}

impl WarmFile {
    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn block_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .index
            .len()
    }

    pub fn size(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).size
    }
}

/// Metadata about one series' warm file
#[derive(Debug, Clone)]
pub struct WarmFileInfo {
    pub series_id: String,
    pub block_count: usize,
    pub size_bytes: u64,
    pub last_modified: SystemTime,
}

/// The on-disk warm storage tier.
pub struct WarmStore {
    config: WarmConfig,
    files: RwLock<HashMap<String, Arc<WarmFile>>>,
}

impl WarmStore {
    /// Open the warm tier, scanning the data directory for existing files.
    ///
    /// Files that cannot be scanned are logged and skipped, never deleted.
    pub fn open(config: WarmConfig) -> StorageResult<Self> {
        if !(1..=9).contains(&config.compression_level) {
            return Err(StorageError::InvalidArgument(format!(
                "compression level {} outside 1..=9",
                config.compression_level
            )));
        }
        std::fs::create_dir_all(&config.data_path)?;

        let mut files = HashMap::new();
        for entry in std::fs::read_dir(&config.data_path)? {
            let path = entry?.path();
            if path.extension().map(|e| e == config.file_suffix.as_str()) != Some(true) {
                continue;
            }
            let Some(series_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::scan_file(series_id, &path) {
                Ok(file) => {
                    files.insert(series_id.to_string(), Arc::new(file));
                }
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping unreadable warm file");
                }
            }
        }

        tracing::info!(
            path = %config.data_path.display(),
            files = files.len(),
            "opened warm store"
        );

        Ok(Self {
            config,
            files: RwLock::new(files),
        })
    }

    /// Reconstruct a file's block index by reading headers sequentially.
    fn scan_file(series_id: &str, path: &Path) -> StorageResult<WarmFile> {
        let meta = std::fs::metadata(path)?;
        let size = meta.len();
        let last_modified = meta.modified()?;

        let mut reader = BufReader::new(File::open(path)?);
        let mut index = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            if size - offset < BLOCK_HEADER_LEN {
                tracing::debug!(?path, offset, "ignoring truncated trailing header");
                break;
            }

            let mut header = [0u8; BLOCK_HEADER_LEN as usize];
            reader.read_exact(&mut header)?;
            let timestamp = i64::from_le_bytes([
                header[0], header[1], header[2], header[3], header[4], header[5], header[6],
                header[7],
            ]);
            let length = i32::from_le_bytes([header[8], header[9], header[10], header[11]]);

            if length < 0 {
                return Err(StorageError::Codec(format!(
                    "negative block length {} at offset {}",
                    length, offset
                )));
            }
            if offset + BLOCK_HEADER_LEN + length as u64 > size {
                tracing::debug!(?path, offset, "ignoring truncated trailing block");
                break;
            }

            index.push(IndexEntry {
                timestamp,
                offset,
                length: length as u32,
            });

            reader.seek(SeekFrom::Current(length as i64))?;
            offset += BLOCK_HEADER_LEN + length as u64;
        }

        index.sort_by_key(|e| e.timestamp);

        Ok(WarmFile {
            series_id: series_id.to_string(),
            path: path.to_path_buf(),
            state: RwLock::new(FileState {
                size,
                last_modified,
                index,
            }),
        })
    }

    fn file_path(&self, series_id: &str) -> PathBuf {
        self.config
            .data_path
            .join(format!("{}.{}", series_id, self.config.file_suffix))
    }

    fn get_or_create_file(&self, series_id: &str) -> Arc<WarmFile> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files
            .entry(series_id.to_string())
            .or_insert_with(|| {
                Arc::new(WarmFile {
                    series_id: series_id.to_string(),
                    path: self.file_path(series_id),
                    state: RwLock::new(FileState {
                        size: 0,
                        last_modified: SystemTime::now(),
                        index: Vec::new(),
                    }),
                })
            })
            .clone()
    }

    /// Append one block of points for a series.
    ///
    /// `points` must be non-empty and sorted ascending by timestamp. The
    /// header and payload are fsynced before the index entry becomes
    /// visible.
    pub fn write(&self, series_id: &str, labels: &Labels, points: &[Sample]) -> StorageResult<()> {
        let record = BlockRecord::from_points(series_id, labels, points)?;
        let payload = encode_block(&record, self.config.compression_level)?;
        let start_ms = record.start_time_millis();

        let warm_file = self.get_or_create_file(series_id);
        let mut state = warm_file.state.write().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&warm_file.path)?;

        file.write_all(&start_ms.to_le_bytes())?;
        file.write_all(&(payload.len() as i32).to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;

        let entry = IndexEntry {
            timestamp: start_ms,
            offset: state.size,
            length: payload.len() as u32,
        };
        // Stable insert: equal start times keep append order.
        let pos = state.index.partition_point(|e| e.timestamp <= start_ms);
        state.index.insert(pos, entry);
        state.size += BLOCK_HEADER_LEN + payload.len() as u64;
        state.last_modified = SystemTime::now();

        if state.size > self.config.max_file_size {
            tracing::warn!(
                series_id,
                size = state.size,
                max = self.config.max_file_size,
                "warm file exceeds configured size bound"
            );
        }

        tracing::debug!(series_id, points = record.count, "wrote warm block");
        Ok(())
    }

    /// Read every sample for a series in the closed interval `[start, end]`
    /// (nanoseconds). Blocks may overlap in time, so the concatenated
    /// result is sorted before returning.
    ///
    /// Opens its own file handle for the call; the store-wide lock is not
    /// held during I/O.
    pub fn read_range(&self, series_id: &str, start: i64, end: i64) -> StorageResult<Vec<Sample>> {
        let warm_file = {
            let files = self.files.read().unwrap_or_else(|e| e.into_inner());
            match files.get(series_id) {
                Some(file) => file.clone(),
                None => return Ok(Vec::new()),
            }
        };

        let state = warm_file.state.read().unwrap_or_else(|e| e.into_inner());
        if state.index.is_empty() {
            return Ok(Vec::new());
        }

        let end_ms = end.div_euclid(NANOS_PER_MILLI);
        let mut file = File::open(&warm_file.path)?;
        let mut results = Vec::new();

        for entry in &state.index {
            // Index is sorted by start time; everything past the window's
            // end cannot intersect it.
            if entry.timestamp > end_ms {
                break;
            }

            file.seek(SeekFrom::Start(entry.offset + BLOCK_HEADER_LEN))?;
            let mut payload = vec![0u8; entry.length as usize];
            file.read_exact(&mut payload)?;

            let block = decode_block(&payload)?;
            results.extend(
                block
                    .points
                    .into_iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end),
            );
        }

        results.sort_by_key(|p| p.timestamp);
        Ok(results)
    }

    /// Coalesce fragmented files (more blocks than the configured
    /// threshold) into a single deduplicated block each, rewriting the file
    /// atomically. Returns the number of files compacted.
    pub fn compact(&self) -> StorageResult<usize> {
        let candidates: Vec<Arc<WarmFile>> = {
            let files = self.files.read().unwrap_or_else(|e| e.into_inner());
            files
                .values()
                .filter(|f| f.block_count() > self.config.compaction_threshold)
                .cloned()
                .collect()
        };

        for warm_file in &candidates {
            self.compact_file(warm_file)?;
        }
        if !candidates.is_empty() {
            tracing::info!(files = candidates.len(), "compacted warm files");
        }
        Ok(candidates.len())
    }

    fn compact_file(&self, warm_file: &WarmFile) -> StorageResult<()> {
        let mut state = warm_file.state.write().unwrap_or_else(|e| e.into_inner());

        // Read all blocks in index order; later blocks win on duplicate
        // timestamps.
        let mut merged: BTreeMap<i64, f64> = BTreeMap::new();
        let mut labels = Labels::new();
        {
            let mut file = File::open(&warm_file.path)?;
            for entry in &state.index {
                file.seek(SeekFrom::Start(entry.offset + BLOCK_HEADER_LEN))?;
                let mut payload = vec![0u8; entry.length as usize];
                file.read_exact(&mut payload)?;

                let block = decode_block(&payload)?;
                labels = block.labels;
                for point in block.points {
                    merged.insert(point.timestamp, point.value);
                }
            }
        }

        let points: Vec<Sample> = merged
            .into_iter()
            .map(|(timestamp, value)| Sample { timestamp, value })
            .collect();
        let record = BlockRecord::from_points(&warm_file.series_id, &labels, &points)?;
        let payload = encode_block(&record, self.config.compression_level)?;
        let start_ms = record.start_time_millis();

        // Rewrite atomically: temp file in the same directory, then rename.
        let tmp_path = warm_file.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&start_ms.to_le_bytes())?;
            tmp.write_all(&(payload.len() as i32).to_le_bytes())?;
            tmp.write_all(&payload)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &warm_file.path)?;

        let old_blocks = state.index.len();
        state.index = vec![IndexEntry {
            timestamp: start_ms,
            offset: 0,
            length: payload.len() as u32,
        }];
        state.size = BLOCK_HEADER_LEN + payload.len() as u64;
        state.last_modified = SystemTime::now();

        tracing::debug!(
            series_id = %warm_file.series_id,
            old_blocks,
            points = record.count,
            "compacted warm file"
        );
        Ok(())
    }

    /// Delete every file whose last write is older than the retention
    /// period. Returns the number removed; the first file error aborts the
    /// batch (retention is best-effort and retried on the next pass).
    pub fn cleanup_expired(&self) -> StorageResult<usize> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let now = SystemTime::now();

        let expired: Vec<String> = files
            .iter()
            .filter(|(_, f)| {
                let state = f.state.read().unwrap_or_else(|e| e.into_inner());
                now.duration_since(state.last_modified)
                    .map(|age| age > self.config.retention)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for series_id in expired {
            if let Some(file) = files.get(&series_id) {
                std::fs::remove_file(&file.path)?;
            }
            files.remove(&series_id);
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "removed expired warm files");
        }
        Ok(removed)
    }

    /// Per-file metadata for every stored series.
    pub fn files_info(&self) -> Vec<WarmFileInfo> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .values()
            .map(|f| {
                let state = f.state.read().unwrap_or_else(|e| e.into_inner());
                WarmFileInfo {
                    series_id: f.series_id.clone(),
                    block_count: state.index.len(),
                    size_bytes: state.size,
                    last_modified: state.last_modified,
                }
            })
            .collect()
    }

    /// Number of series with a warm file (one file per series).
    pub fn series_count(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn file_count(&self) -> usize {
        self.series_count()
    }

    /// Total bytes across all warm files.
    pub fn total_bytes(&self) -> u64 {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.values().map(|f| f.size()).sum()
    }
}
