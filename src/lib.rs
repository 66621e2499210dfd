//! # dedup-lake
//!
//! Content-addressed deduplication and partitioned artifact storage for ETL
//! pipelines. Payloads are fingerprinted, registered exactly once in an
//! embedded DuckDB index, and written as Parquet files into a hive-style
//! partition tree that DuckDB can query in place.
//!
//! ## Architecture
//!
//! - **models**: Fingerprints, artifact ids, partition keys, dedup records
//! - **index**: Exactly-once registration of fingerprints
//! - **partition**: Metadata to partition key and path derivation
//! - **storage**: Crash-safe artifact persistence (Parquet on local disk)
//! - **catalog**: Read-only queries over committed artifacts
//! - **ingest**: The [`Lake`] pipeline tying the pieces together
//! - **config**: Configuration loading and validation
//! - **telemetry**: Logging setup

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod partition;
pub mod storage;
pub mod telemetry;

pub use catalog::{ArtifactIter, Catalog, PartitionFilter};
pub use config::LakeConfig;
pub use error::{ErrorKind, LakeError};
pub use index::{DedupIndex, RegisterOutcome};
pub use ingest::{Lake, LakeStats, RecoveryReport, Submission};
pub use models::*;
pub use partition::{PartitionResolver, PartitionScheme};
pub use storage::{LocalBackend, StorageBackend};

use std::time::Duration;

/// Parse a human-friendly duration string (e.g., "1d", "6h", "30m", "90s").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('d') {
        (n, 86400)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Default to seconds
        (s, 1)
    };

    let num: u64 = num_str.parse().ok()?;
    num.checked_mul(multiplier).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_hours() {
        assert_eq!(parse_duration("6h"), Some(Duration::from_secs(21600)));
    }

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_duration_default_seconds() {
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn test_parse_duration_empty() {
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_duration_zero() {
        assert_eq!(parse_duration("0s"), Some(Duration::from_secs(0)));
    }

    #[test]
    fn test_parse_duration_days() {
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172800)));
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration(&format!("{}h", u64::MAX)), None);
    }

    #[test]
    fn test_parse_duration_large() {
        assert_eq!(parse_duration("9999h"), Some(Duration::from_secs(35996400)));
    }
}
