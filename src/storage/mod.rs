//! Filesystem artifact storage.
//!
//! Artifacts live in a hive-partitioned tree of Parquet files under the data
//! directory, next to the DuckDB file:
//! - `artifacts/`: committed artifacts, one Parquet file each
//! - `.staging/`: in-flight writes, moved into `artifacts/` when complete

mod local;
pub mod parquet;

pub use self::local::{LocalBackend, StagedArtifact};
pub use self::parquet::ArtifactFile;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::models::{
    ArtifactId, ContentFingerprint, PartitionKey, RecordMetadata, StoredArtifact,
};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Disk or permission failure; the write can be retried.
    #[error("cannot write {path}: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The final path already holds a different artifact.
    #[error("partition conflict at {path}: holds {existing}, refusing {incoming}")]
    PartitionConflict {
        path: PathBuf,
        existing: ContentFingerprint,
        incoming: ContentFingerprint,
    },

    #[error("artifact not found: {0}")]
    NotFound(PathBuf),

    /// An artifact file exists but cannot be decoded.
    #[error("unreadable artifact {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(".staging")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

/// Everything needed to persist one artifact.
#[derive(Debug, Clone, Copy)]
pub struct StoreRequest<'a> {
    pub partition_key: &'a PartitionKey,
    pub artifact_id: &'a ArtifactId,
    pub fingerprint: &'a ContentFingerprint,
    pub payload: &'a [u8],
    pub metadata: &'a RecordMetadata,
}

/// Physical persistence of artifacts.
///
/// Paths passed in and out are relative to the backend's artifact root.
pub trait StorageBackend: Send + Sync {
    /// Durably write an artifact into its partition.
    ///
    /// Returns only once the artifact is fully visible at its final path.
    fn store(&self, request: StoreRequest<'_>) -> Result<StoredArtifact, StorageError>;

    fn read_artifact(&self, relative_path: &Path) -> Result<ArtifactFile, StorageError>;

    fn read_payload(&self, relative_path: &Path) -> Result<Vec<u8>, StorageError> {
        Ok(self.read_artifact(relative_path)?.payload)
    }

    fn exists(&self, relative_path: &Path) -> bool;

    /// Delete an artifact. Returns `false` if it did not exist.
    fn remove(&self, relative_path: &Path) -> Result<bool, StorageError>;

    /// Artifact files under `prefix`, sorted.
    fn list_artifacts(&self, prefix: &Path) -> Result<Vec<PathBuf>, StorageError>;

    /// Location string the query engine can open.
    fn locate(&self, relative_path: &Path) -> Result<String, StorageError>;

    /// Remove staging files older than `max_age`; returns how many.
    fn sweep_staging(&self, max_age: Duration) -> Result<usize, StorageError>;

    fn staging_count(&self) -> Result<usize, StorageError>;
}
