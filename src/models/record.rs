//! Dedup records and stored artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ArtifactId, ContentFingerprint, PartitionKey};

/// Lifecycle of a registered fingerprint. `Unknown` is the absence of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupState {
    /// Registered, artifact write not yet confirmed
    Pending,
    /// Artifact persisted in the partitioned tree
    Committed,
}

impl DedupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupState::Pending => "pending",
            DedupState::Committed => "committed",
        }
    }
}

impl fmt::Display for DedupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DedupState::Pending),
            "committed" => Ok(DedupState::Committed),
            other => Err(format!("unknown dedup state '{}'", other)),
        }
    }
}

/// First-seen record for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub fingerprint: ContentFingerprint,
    pub artifact_id: ArtifactId,
    pub partition_key: PartitionKey,
    pub state: DedupState,
    pub first_seen_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    /// Path relative to the artifact root; set once committed
    pub storage_path: Option<PathBuf>,
}

impl DedupRecord {
    pub fn is_committed(&self) -> bool {
        self.state == DedupState::Committed
    }
}

/// An artifact persisted in the partitioned tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub artifact_id: ArtifactId,
    pub fingerprint: ContentFingerprint,
    pub partition_key: PartitionKey,
    /// Path relative to the artifact root; the payload reference
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    pub stored_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_roundtrip() {
        for state in [DedupState::Pending, DedupState::Committed] {
            assert_eq!(state.as_str().parse::<DedupState>().unwrap(), state);
        }
        assert!("done".parse::<DedupState>().is_err());
    }

    #[test]
    fn test_state_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&DedupState::Committed).unwrap(),
            "\"committed\""
        );
    }
}
