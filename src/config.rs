//! Configuration
//!
//! Loads configuration from TOML files with environment variable
//! overrides (`MERIDIAN_*`). Every field has a default so a partial file
//! or no file at all still yields a working configuration.

use crate::analytics::{AnalyticsConfig, DetectorKind, ForecastKind};
use crate::ingest::{PipelineConfig, ValidatorConfig};
use crate::storage::warm::WarmConfig;
use crate::storage::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub ingestion: IngestionSettings,

    #[serde(default)]
    pub analytics: AnalyticsSettings,
}

/// Storage configuration, both tiers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub hot: HotSettings,

    #[serde(default)]
    pub warm: WarmSettings,
}

/// Hot tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HotSettings {
    #[serde(default = "default_max_series")]
    pub max_series: usize,

    #[serde(default = "default_max_points_per_series")]
    pub max_points_per_series: usize,

    #[serde(default = "default_hot_retention_secs")]
    pub retention_period_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_tiering_interval_secs")]
    pub tiering_interval_secs: u64,
}

fn default_max_series() -> usize {
    100_000
}

fn default_max_points_per_series() -> usize {
    10_000
}

fn default_hot_retention_secs() -> u64 {
    6 * 3600
}

fn default_cleanup_interval_secs() -> u64 {
    30 * 60
}

fn default_tiering_interval_secs() -> u64 {
    15 * 60
}

impl Default for HotSettings {
    fn default() -> Self {
        Self {
            max_series: default_max_series(),
            max_points_per_series: default_max_points_per_series(),
            retention_period_secs: default_hot_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            tiering_interval_secs: default_tiering_interval_secs(),
        }
    }
}

/// Warm tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WarmSettings {
    #[serde(default = "default_warm_enabled")]
    pub enabled: bool,

    #[serde(default = "default_data_path")]
    pub data_path: String,

    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    #[serde(default = "default_warm_retention_secs")]
    pub retention_period_secs: u64,

    #[serde(default = "default_compaction_interval_secs")]
    pub compaction_interval_secs: u64,

    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_warm_enabled() -> bool {
    true
}

fn default_data_path() -> String {
    "./data/warm".to_string()
}

fn default_file_suffix() -> String {
    "tsw".to_string()
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_warm_retention_secs() -> u64 {
    30 * 24 * 3600
}

fn default_compaction_interval_secs() -> u64 {
    6 * 3600
}

fn default_compression_level() -> u32 {
    6
}

impl Default for WarmSettings {
    fn default() -> Self {
        Self {
            enabled: default_warm_enabled(),
            data_path: default_data_path(),
            file_suffix: default_file_suffix(),
            max_file_size_mb: default_max_file_size_mb(),
            retention_period_secs: default_warm_retention_secs(),
            compaction_interval_secs: default_compaction_interval_secs(),
            compression_level: default_compression_level(),
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default)]
    pub validation: ValidationSettings,
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    5000
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            validation: ValidationSettings::default(),
        }
    }
}

/// Metric validation rules
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_max_value_range")]
    pub max_value_range: f64,

    /// Empty means all metric names are allowed
    #[serde(default)]
    pub allowed_metrics: Vec<String>,

    #[serde(default)]
    pub required_labels: Vec<String>,

    #[serde(default = "default_future_tolerance_secs")]
    pub future_tolerance_secs: u64,

    #[serde(default = "default_past_tolerance_secs")]
    pub past_tolerance_secs: u64,
}

fn default_max_value_range() -> f64 {
    1e12
}

fn default_future_tolerance_secs() -> u64 {
    3600
}

fn default_past_tolerance_secs() -> u64 {
    7 * 24 * 3600
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_value_range: default_max_value_range(),
            allowed_metrics: Vec::new(),
            required_labels: Vec::new(),
            future_tolerance_secs: default_future_tolerance_secs(),
            past_tolerance_secs: default_past_tolerance_secs(),
        }
    }
}

/// Analytics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsSettings {
    /// zscore | iqr | moving_mad
    #[serde(default = "default_detector_method")]
    pub default_method: String,

    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    #[serde(default = "default_window_size")]
    pub default_window_size: usize,

    #[serde(default = "default_max_results_per_series")]
    pub max_results_per_series: usize,

    /// linear | holt_winters | persistence
    #[serde(default = "default_forecast_method")]
    pub forecast_method: String,

    #[serde(default = "default_forecast_cache_ttl_secs")]
    pub forecast_cache_ttl_secs: u64,
}

fn default_detector_method() -> String {
    "zscore".to_string()
}

fn default_threshold() -> f64 {
    3.0
}

fn default_window_size() -> usize {
    100
}

fn default_max_results_per_series() -> usize {
    1000
}

fn default_forecast_method() -> String {
    "linear".to_string()
}

fn default_forecast_cache_ttl_secs() -> u64 {
    300
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            default_method: default_detector_method(),
            default_threshold: default_threshold(),
            default_window_size: default_window_size(),
            max_results_per_series: default_max_results_per_series(),
            forecast_method: default_forecast_method(),
            forecast_cache_ttl_secs: default_forecast_cache_ttl_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from conventional locations, falling back to defaults plus
    /// environment overrides.
    pub fn load_default() -> Self {
        let candidates = [
            dirs::config_dir().map(|p| p.join("meridian").join("config.toml")),
            Some(PathBuf::from("/etc/meridian/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in candidates.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(?path, "loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "failed to load config");
                    }
                }
            }
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `MERIDIAN_*` environment overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MERIDIAN_DATA_PATH") {
            self.storage.warm.data_path = path;
        }
        if let Ok(v) = std::env::var("MERIDIAN_HOT_MAX_SERIES") {
            if let Ok(n) = v.parse() {
                self.storage.hot.max_series = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_HOT_MAX_POINTS") {
            if let Ok(n) = v.parse() {
                self.storage.hot.max_points_per_series = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_WARM_ENABLED") {
            if let Ok(b) = v.parse() {
                self.storage.warm.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_COMPRESSION_LEVEL") {
            if let Ok(n) = v.parse() {
                self.storage.warm.compression_level = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_BUFFER_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.ingestion.buffer_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.ingestion.batch_size = n;
            }
        }
        if let Ok(method) = std::env::var("MERIDIAN_DETECTOR_METHOD") {
            self.analytics.default_method = method;
        }
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=9).contains(&self.storage.warm.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "compression_level {} outside 1..=9",
                self.storage.warm.compression_level
            )));
        }
        self.analytics
            .default_method
            .parse::<DetectorKind>()
            .map_err(ConfigError::Invalid)?;
        self.analytics
            .forecast_method
            .parse::<ForecastKind>()
            .map_err(ConfigError::Invalid)?;
        if self.ingestion.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl StorageSettings {
    /// Runtime configuration for the storage engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_series: self.hot.max_series,
            max_points_per_series: self.hot.max_points_per_series,
            hot_retention: Duration::from_secs(self.hot.retention_period_secs),
            cleanup_interval: Duration::from_secs(self.hot.cleanup_interval_secs),
            tiering_interval: Duration::from_secs(self.hot.tiering_interval_secs),
            compaction_interval: Duration::from_secs(self.warm.compaction_interval_secs),
            warm: self.warm.enabled.then(|| WarmConfig {
                data_path: PathBuf::from(&self.warm.data_path),
                file_suffix: self.warm.file_suffix.clone(),
                max_file_size: self.warm.max_file_size_mb * 1024 * 1024,
                compression_level: self.warm.compression_level,
                retention: Duration::from_secs(self.warm.retention_period_secs),
                ..Default::default()
            }),
        }
    }
}

impl IngestionSettings {
    /// Runtime configuration for the stream processor.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            validation: ValidatorConfig {
                max_value_range: self.validation.max_value_range,
                allowed_metrics: self.validation.allowed_metrics.clone(),
                required_labels: self.validation.required_labels.clone(),
                future_tolerance: Duration::from_secs(self.validation.future_tolerance_secs),
                past_tolerance: Duration::from_secs(self.validation.past_tolerance_secs),
            },
        }
    }
}

impl AnalyticsSettings {
    /// Runtime configuration for the analytics engine.
    ///
    /// `validate()` has already established that the method names parse;
    /// unknown names fall back to the defaults here rather than panicking.
    pub fn analytics_config(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            default_method: self
                .default_method
                .parse()
                .unwrap_or(DetectorKind::ZScore),
            default_threshold: self.default_threshold,
            default_window_size: self.default_window_size,
            max_results_per_series: self.max_results_per_series,
            forecast_method: self.forecast_method.parse().unwrap_or(ForecastKind::Linear),
            forecast_cache_ttl: Duration::from_secs(self.forecast_cache_ttl_secs),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
