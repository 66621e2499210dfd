//! Artifact identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ContentFingerprint;
use crate::partition::{encode_segment, ARTIFACT_EXTENSION, MAX_PATH_COMPONENT_LEN};

/// Longest accepted artifact id once encoded as a file stem.
pub const MAX_ARTIFACT_ID_LEN: usize = MAX_PATH_COMPONENT_LEN - ARTIFACT_EXTENSION.len() - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactIdError {
    #[error("artifact id is empty")]
    Empty,

    #[error("artifact id is {0} bytes as a file name, limit is {MAX_ARTIFACT_ID_LEN}")]
    TooLong(usize),

    #[error("artifact id contains control characters")]
    ControlCharacters,
}

/// Stable identifier of an artifact inside its partition.
///
/// Any printable text is accepted; the partition resolver encodes it before
/// it becomes a filename.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Result<Self, ArtifactIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ArtifactIdError::Empty);
        }
        if id.chars().any(char::is_control) {
            return Err(ArtifactIdError::ControlCharacters);
        }
        let encoded_len = encode_segment(&id).len();
        if encoded_len > MAX_ARTIFACT_ID_LEN {
            return Err(ArtifactIdError::TooLong(encoded_len));
        }
        Ok(Self(id))
    }

    /// Content-addressed id: the fingerprint hex.
    pub fn from_fingerprint(fingerprint: &ContentFingerprint) -> Self {
        Self(fingerprint.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = ArtifactIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ArtifactId {
    type Error = ArtifactIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fingerprint;

    #[test]
    fn test_artifact_id_accepts_text() {
        let id = ArtifactId::new("edition-42/article 7").unwrap();
        assert_eq!(id.as_str(), "edition-42/article 7");
        assert_eq!(format!("{}", id), "edition-42/article 7");
    }

    #[test]
    fn test_artifact_id_rejects_empty() {
        assert_eq!(ArtifactId::new(""), Err(ArtifactIdError::Empty));
        assert_eq!(ArtifactId::new("   "), Err(ArtifactIdError::Empty));
    }

    #[test]
    fn test_artifact_id_rejects_control_chars() {
        assert_eq!(
            ArtifactId::new("a\nb"),
            Err(ArtifactIdError::ControlCharacters)
        );
    }

    #[test]
    fn test_artifact_id_rejects_long() {
        let long = "x".repeat(MAX_ARTIFACT_ID_LEN + 1);
        assert_eq!(
            ArtifactId::new(long),
            Err(ArtifactIdError::TooLong(MAX_ARTIFACT_ID_LEN + 1))
        );
    }

    #[test]
    fn test_artifact_id_limit_applies_after_encoding() {
        assert_eq!(
            ArtifactId::new("/".repeat(100)),
            Err(ArtifactIdError::TooLong(300))
        );
        assert_eq!(
            ArtifactId::new("é".repeat(100)),
            Err(ArtifactIdError::TooLong(600))
        );
        assert!(ArtifactId::new("x".repeat(MAX_ARTIFACT_ID_LEN)).is_ok());
    }

    #[test]
    fn test_artifact_id_from_fingerprint() {
        let fp = fingerprint(b"hello");
        let id = ArtifactId::from_fingerprint(&fp);
        assert_eq!(id.as_str(), fp.to_hex());
    }

    #[test]
    fn test_artifact_id_serde_validates() {
        let id: ArtifactId = serde_json::from_str("\"doc-1\"").unwrap();
        assert_eq!(id.as_str(), "doc-1");
        assert!(serde_json::from_str::<ArtifactId>("\"\"").is_err());
    }
}
