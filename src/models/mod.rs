//! Core data structures shared by the index, storage and catalog.

pub mod fingerprint;
pub mod ids;
pub mod metadata;
pub mod partition;
pub mod record;

pub use fingerprint::{fingerprint, ContentFingerprint, FingerprintParseError, Hasher};
pub use ids::{ArtifactId, ArtifactIdError};
pub use metadata::RecordMetadata;
pub use partition::{PartitionKey, PartitionSegment};
pub use record::{DedupRecord, DedupState, StoredArtifact};
