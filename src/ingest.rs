//! Ingestion pipeline.
//!
//! [`Lake`] ties the pieces together for a single submission:
//! fingerprint the payload, derive its partition, register it in the dedup
//! index, persist it, then commit the registration. A crash between any two
//! steps leaves state that [`Lake::recover`] can roll forward or reclaim.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::LakeConfig;
use crate::db::Database;
use crate::error::LakeError;
use crate::index::{DedupIndex, IndexError, PendingEntry, RegisterOutcome};
use crate::models::{
    fingerprint, ArtifactId, ContentFingerprint, DedupRecord, RecordMetadata, StoredArtifact,
};
use crate::partition::PartitionResolver;
use crate::storage::{LocalBackend, StorageBackend, StorageConfig, StorageError, StoreRequest};

/// Outcome of [`Lake::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The payload was new and is now committed.
    Stored(StoredArtifact),
    /// The payload was seen before. The record may still be pending if
    /// another writer is storing it right now.
    Duplicate(DedupRecord),
}

impl Submission {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Submission::Duplicate(_))
    }

    pub fn fingerprint(&self) -> &ContentFingerprint {
        match self {
            Submission::Stored(artifact) => &artifact.fingerprint,
            Submission::Duplicate(record) => &record.fingerprint,
        }
    }

    /// Artifact path relative to the artifact root, once known.
    pub fn storage_path(&self) -> Option<&Path> {
        match self {
            Submission::Stored(artifact) => Some(&artifact.relative_path),
            Submission::Duplicate(record) => record.storage_path.as_deref(),
        }
    }
}

/// Result of a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Pending registrations whose artifact was already published
    pub rolled_forward: usize,
    /// Pending registrations released after the grace period
    pub reclaimed: usize,
    /// Orphaned staging files removed
    pub staging_removed: usize,
}

/// Point-in-time counters for the lake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LakeStats {
    pub artifact_files: usize,
    pub staging_files: usize,
    pub pending: u64,
    pub committed: u64,
}

/// Handle to an open lake: one DuckDB file plus the artifact tree next to it.
///
/// Share it across threads behind an `Arc`; every method takes `&self`.
pub struct Lake {
    config: LakeConfig,
    db: Arc<Database>,
    index: DedupIndex,
    resolver: PartitionResolver,
    backend: Arc<LocalBackend>,
    catalog: Catalog,
    orphan_ttl: Duration,
}

impl Lake {
    /// Open (or create) the lake rooted at `config.data_dir`.
    ///
    /// Fails with a retryable error while another handle, in this process or
    /// another one, holds the database.
    pub fn open(config: LakeConfig) -> Result<Self, LakeError> {
        config.validate()?;
        let db = Database::open(&config.database_path()).map_err(IndexError::Unavailable)?;
        Self::with_database(config, Arc::new(db))
    }

    /// Build a lake around an already opened database.
    pub fn with_database(config: LakeConfig, db: Arc<Database>) -> Result<Self, LakeError> {
        let pending_grace = config.pending_grace()?;
        let orphan_ttl = config.orphan_ttl()?;

        let resolver = PartitionResolver::new(config.partition.scheme());
        let backend = Arc::new(LocalBackend::new(
            &StorageConfig::new(config.data_dir.clone()),
            resolver.clone(),
            &config.parquet,
        )?);

        let index = DedupIndex::new(Arc::clone(&db), pending_grace);
        let catalog = Catalog::new(
            Arc::clone(&db),
            backend.clone(),
            resolver.clone(),
            index.clone(),
            config.catalog.page_size,
        );

        info!(
            "Opened lake at {:?} (partitions: {})",
            config.data_dir,
            resolver.scheme().segment_names().join("/")
        );
        Ok(Self {
            config,
            db,
            index,
            resolver,
            backend,
            catalog,
            orphan_ttl,
        })
    }

    pub fn config(&self) -> &LakeConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    pub fn resolver(&self) -> &PartitionResolver {
        &self.resolver
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    /// Read-only query facade for downstream consumers.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Ingest one payload.
    ///
    /// Without an explicit `artifact_id` the fingerprint's hex form is used.
    /// Metadata is validated before anything is registered, so a malformed
    /// record leaves no trace in the index.
    pub fn submit(
        &self,
        payload: &[u8],
        metadata: &RecordMetadata,
        artifact_id: Option<ArtifactId>,
    ) -> Result<Submission, LakeError> {
        let fingerprint = fingerprint(payload);
        let artifact_id = artifact_id.unwrap_or_else(|| ArtifactId::from_fingerprint(&fingerprint));
        let partition_key = self.resolver.resolve(metadata)?;

        let claim = match self
            .index
            .check_and_register(&fingerprint, &artifact_id, &partition_key)?
        {
            RegisterOutcome::Inserted(claim) => claim,
            RegisterOutcome::AlreadyExists(record) => {
                debug!(
                    "Duplicate payload {} (first seen as {}, {})",
                    fingerprint.short(),
                    record.artifact_id,
                    record.state
                );
                return Ok(Submission::Duplicate(record));
            }
        };

        let request = StoreRequest {
            partition_key: &partition_key,
            artifact_id: &artifact_id,
            fingerprint: &fingerprint,
            payload,
            metadata,
        };
        let stored = match self.backend.store(request) {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(abandon_err) = self.index.abandon(&claim) {
                    warn!(
                        "Failed to release registration for {}: {}",
                        fingerprint.short(),
                        abandon_err
                    );
                }
                return Err(e.into());
            }
        };

        match self.index.finalize(&claim, &stored.relative_path) {
            Ok(_) => {
                debug!(
                    "Stored {} as {:?}",
                    fingerprint.short(),
                    stored.relative_path
                );
                Ok(Submission::Stored(stored))
            }
            Err(e @ IndexError::ClaimLost { .. }) => {
                self.release_lost_artifact(&stored);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the file written under a claim that was taken over, unless the
    /// new holder writes to the same path.
    fn release_lost_artifact(&self, stored: &StoredArtifact) {
        let holder = match self.index.lookup(&stored.fingerprint) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    "Cannot check holder of {} after losing claim: {}",
                    stored.fingerprint.short(),
                    e
                );
                return;
            }
        };

        let holder_path = self
            .resolver
            .path_for(&holder.partition_key, &holder.artifact_id);
        if holder_path == stored.relative_path {
            return;
        }

        match self.backend.remove(&stored.relative_path) {
            Ok(true) => warn!(
                "Claim on {} lost; removed {:?}",
                stored.fingerprint.short(),
                stored.relative_path
            ),
            Ok(false) => {}
            Err(e) => warn!(
                "Claim on {} lost; failed to remove {:?}: {}",
                stored.fingerprint.short(),
                stored.relative_path,
                e
            ),
        }
    }

    pub fn lookup(&self, fingerprint: &ContentFingerprint) -> Result<Option<DedupRecord>, LakeError> {
        Ok(self.index.lookup(fingerprint)?)
    }

    /// Payload of a committed artifact.
    pub fn read_payload(&self, relative_path: &Path) -> Result<Vec<u8>, LakeError> {
        Ok(self.backend.read_payload(relative_path)?)
    }

    /// Bring the index and the artifact tree back in line after a crash.
    ///
    /// Pending registrations whose artifact is already published with the
    /// same fingerprint are committed. Those still pending after the grace
    /// period are released, and staging files older than the orphan TTL are
    /// deleted.
    pub fn recover(&self) -> Result<RecoveryReport, LakeError> {
        let mut report = RecoveryReport::default();

        for entry in self.index.pending_older_than(Duration::ZERO)? {
            if self.roll_forward(&entry)? {
                report.rolled_forward += 1;
            }
        }

        report.reclaimed = self
            .index
            .reclaim_expired(self.index.pending_grace())?
            .len();
        report.staging_removed = self.sweep_staging()?;

        info!(
            "Recovery complete: {} rolled forward, {} reclaimed, {} staging files removed",
            report.rolled_forward, report.reclaimed, report.staging_removed
        );
        Ok(report)
    }

    fn roll_forward(&self, entry: &PendingEntry) -> Result<bool, LakeError> {
        let record = &entry.record;
        let expected = self
            .resolver
            .path_for(&record.partition_key, &record.artifact_id);
        if !self.backend.exists(&expected) {
            return Ok(false);
        }

        let artifact = match self.backend.read_artifact(&expected) {
            Ok(file) => file.artifact,
            Err(e @ (StorageError::Unreadable { .. } | StorageError::Parquet(_))) => {
                warn!("Skipping unreadable artifact {:?}: {}", expected, e);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if artifact.fingerprint != record.fingerprint {
            error!(
                "Artifact at {:?} holds {}, pending registration expects {}",
                expected,
                artifact.fingerprint.short(),
                record.fingerprint.short()
            );
            return Ok(false);
        }

        match self.index.finalize(&entry.claim, &expected) {
            Ok(_) => {
                info!(
                    "Rolled forward {} at {:?}",
                    record.fingerprint.short(),
                    expected
                );
                Ok(true)
            }
            Err(IndexError::ClaimLost { .. }) => {
                debug!(
                    "Pending {} changed hands during recovery",
                    record.fingerprint.short()
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete staging files older than the configured orphan TTL.
    pub fn sweep_staging(&self) -> Result<usize, LakeError> {
        let removed = self.backend.sweep_staging(self.orphan_ttl)?;
        if removed > 0 {
            info!("Swept {} orphaned staging files", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<LakeStats, LakeError> {
        let counts = self.index.counts()?;
        Ok(LakeStats {
            artifact_files: self.backend.list_artifacts(Path::new(""))?.len(),
            staging_files: self.backend.staging_count()?,
            pending: counts.pending,
            committed: counts.committed,
        })
    }
}
