//! Partition keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named component of a partition key, e.g. `month = "01"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionSegment {
    pub name: String,
    pub value: String,
}

impl PartitionSegment {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered tuple of partition values, each tagged with the field it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Vec<PartitionSegment>);

impl PartitionKey {
    pub fn new(segments: Vec<PartitionSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PartitionSegment] {
        &self.0
    }

    /// The bare values, in order: `("2024", "01", "a")`.
    pub fn values(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.value.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the leading values of this key equal `prefix`.
    pub fn starts_with<S: AsRef<str>>(&self, prefix: &[S]) -> bool {
        prefix.len() <= self.0.len()
            && self
                .0
                .iter()
                .zip(prefix)
                .all(|(seg, want)| seg.value == want.as_ref())
    }

    pub fn to_json(&self) -> String {
        // A Vec of plain string structs cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s).map(Self)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}={}", seg.name, seg.value)?;
        }
        Ok(())
    }
}
