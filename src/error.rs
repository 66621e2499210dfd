//! Top-level error type for the ingestion pipeline.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::index::IndexError;
use crate::models::ArtifactIdError;
use crate::partition::PartitionError;
use crate::storage::StorageError;
use crate::telemetry::TelemetryError;

/// Coarse classification of a [`LakeError`], for callers deciding whether to
/// retry, skip the record, or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The record itself is bad; retrying cannot help.
    MalformedInput,
    /// Disk, lock or engine failure; the same call may succeed later.
    StorageUnavailable,
    /// Persisted state violates its own invariants.
    IndexCorruption,
    /// A different artifact already occupies the target path.
    PartitionConflict,
    /// The pending registration was taken over; resubmit to learn the outcome.
    ClaimLost,
    /// Bad configuration.
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::IndexCorruption => "index_corruption",
            ErrorKind::PartitionConflict => "partition_conflict",
            ErrorKind::ClaimLost => "claim_lost",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LakeError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("invalid artifact id: {0}")]
    ArtifactId(#[from] ArtifactIdError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

fn index_kind(e: &IndexError) -> ErrorKind {
    match e {
        IndexError::Unavailable(_) => ErrorKind::StorageUnavailable,
        IndexError::Corruption { .. } => ErrorKind::IndexCorruption,
        IndexError::ClaimLost { .. } => ErrorKind::ClaimLost,
    }
}

fn storage_kind(e: &StorageError) -> ErrorKind {
    match e {
        StorageError::PartitionConflict { .. } => ErrorKind::PartitionConflict,
        StorageError::Unreadable { .. }
        | StorageError::Parquet(_)
        | StorageError::Arrow(_)
        | StorageError::Json(_) => ErrorKind::IndexCorruption,
        StorageError::InvalidPath(_) => ErrorKind::MalformedInput,
        StorageError::Unwritable { .. } | StorageError::NotFound(_) | StorageError::Io(_) => {
            ErrorKind::StorageUnavailable
        }
    }
}

impl LakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LakeError::Partition(_) | LakeError::ArtifactId(_) => ErrorKind::MalformedInput,
            LakeError::Index(e) => index_kind(e),
            LakeError::Storage(e) => storage_kind(e),
            LakeError::Catalog(e) => match e {
                CatalogError::Engine(_) => ErrorKind::StorageUnavailable,
                CatalogError::Storage(e) => storage_kind(e),
                CatalogError::Index(e) => index_kind(e),
                CatalogError::Corruption { .. } => ErrorKind::IndexCorruption,
            },
            LakeError::Database(_) => ErrorKind::StorageUnavailable,
            LakeError::Config(_) | LakeError::Telemetry(_) => ErrorKind::Configuration,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StorageUnavailable | ErrorKind::ClaimLost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fingerprint;
    use std::path::PathBuf;

    #[test]
    fn test_malformed_input_not_retryable() {
        let err = LakeError::from(PartitionError::MalformedMetadata {
            field: "date",
            reason: "missing".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unwritable_is_retryable() {
        let err = LakeError::from(StorageError::Unwritable {
            path: PathBuf::from("/lake/.staging/x.tmp"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_conflict_and_corruption() {
        let conflict = LakeError::from(StorageError::PartitionConflict {
            path: PathBuf::from("year=2024/a.parquet"),
            existing: fingerprint(b"a"),
            incoming: fingerprint(b"b"),
        });
        assert_eq!(conflict.kind(), ErrorKind::PartitionConflict);
        assert!(!conflict.is_retryable());

        let corrupt = LakeError::from(IndexError::Corruption {
            fingerprint: "ab".to_string(),
            reason: "bad state".to_string(),
        });
        assert_eq!(corrupt.kind(), ErrorKind::IndexCorruption);
        assert!(!corrupt.is_retryable());
    }

    #[test]
    fn test_claim_lost() {
        let err = LakeError::from(IndexError::ClaimLost {
            fingerprint: fingerprint(b"x"),
        });
        assert_eq!(err.kind(), ErrorKind::ClaimLost);
        assert_eq!(err.kind().to_string(), "claim_lost");
    }

    #[test]
    fn test_index_unavailable() {
        let err = LakeError::from(IndexError::Unavailable(DbError::Poisoned));
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.is_retryable());
    }
}
