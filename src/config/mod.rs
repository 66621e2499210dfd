//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::parse_duration;
use crate::partition::{DateGranularity, PartitionField, PartitionScheme};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// When the log file rolls over to a new dated file
    #[serde(default)]
    pub rotation: LogRotation,

    /// Rolled log files kept, oldest deleted first
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

/// Log file rollover period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    #[default]
    Daily,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            rotation: LogRotation::default(),
            max_files: default_max_log_files(),
        }
    }
}

/// Partition derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default = "default_granularity")]
    pub granularity: DateGranularity,

    /// Metadata fields appended after the date segments, in order
    #[serde(default = "default_partition_fields")]
    pub fields: Vec<PartitionField>,
}

fn default_granularity() -> DateGranularity {
    DateGranularity::Month
}

fn default_partition_fields() -> Vec<PartitionField> {
    vec![PartitionField::Source]
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            fields: default_partition_fields(),
        }
    }
}

impl PartitionConfig {
    pub fn scheme(&self) -> PartitionScheme {
        PartitionScheme::new(self.granularity, self.fields.clone())
    }
}

/// Dedup index behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a registration may stay pending before it can be reclaimed
    #[serde(default = "default_pending_grace")]
    pub pending_grace: String,
}

fn default_pending_grace() -> String {
    "15m".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            pending_grace: default_pending_grace(),
        }
    }
}

/// Staging area behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Staging files older than this are treated as orphans
    #[serde(default = "default_orphan_ttl")]
    pub orphan_ttl: String,
}

fn default_orphan_ttl() -> String {
    "1h".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            orphan_ttl: default_orphan_ttl(),
        }
    }
}

/// Parquet compression codec for artifact files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Snappy,
    Zstd,
}

/// Artifact file format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetConfig {
    #[serde(default = "default_compression")]
    pub compression: ParquetCompression,

    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

fn default_compression() -> ParquetCompression {
    ParquetCompression::Zstd
}

fn default_zstd_level() -> i32 {
    9
}

impl Default for ParquetConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            zstd_level: default_zstd_level(),
        }
    }
}

/// Catalog query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Rows fetched from the engine per page of a lazy query
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    500
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// DuckDB file name, relative to `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub partition: PartitionConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub staging: StagingConfig,

    #[serde(default)]
    pub parquet: ParquetConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_database_file() -> String {
    "lake.duckdb".to_string()
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            logging: LoggingConfig::default(),
            partition: PartitionConfig::default(),
            dedup: DedupConfig::default(),
            staging: StagingConfig::default(),
            parquet: ParquetConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl LakeConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: LakeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn pending_grace(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.dedup.pending_grace).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "dedup.pending_grace is not a duration: '{}'",
                self.dedup.pending_grace
            ))
        })
    }

    pub fn orphan_ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.staging.orphan_ttl).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "staging.orphan_ttl is not a duration: '{}'",
                self.staging.orphan_ttl
            ))
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_file.trim().is_empty()
            || self.database_file.contains('/')
            || self.database_file.contains('\\')
        {
            return Err(ConfigError::ValidationError(format!(
                "database_file must be a plain file name, got '{}'",
                self.database_file
            )));
        }

        if self.pending_grace()?.is_zero() {
            return Err(ConfigError::ValidationError(
                "dedup.pending_grace must be greater than 0".to_string(),
            ));
        }

        self.orphan_ttl()?;

        if self.logging.max_files == 0 {
            return Err(ConfigError::ValidationError(
                "logging.max_files must be greater than 0".to_string(),
            ));
        }

        if self.catalog.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "catalog.page_size must be greater than 0".to_string(),
            ));
        }

        if !(1..=22).contains(&self.parquet.zstd_level) {
            return Err(ConfigError::ValidationError(format!(
                "parquet.zstd_level must be within 1..=22, got {}",
                self.parquet.zstd_level
            )));
        }

        let mut seen = Vec::new();
        for field in &self.partition.fields {
            if seen.contains(field) {
                return Err(ConfigError::ValidationError(format!(
                    "partition field '{}' listed twice",
                    field.name()
                )));
            }
            seen.push(*field);
        }

        Ok(())
    }
}
