//! Local filesystem backend.
//!
//! Write protocol: encode into `.staging/<uuid>.tmp`, `sync_all`, then link the
//! staged file to its final partitioned path and drop the staging name. The
//! link fails if the final path exists, so a committed artifact is never
//! overwritten and readers never see a partial file.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, Utc};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::parquet::{read_artifact, write_artifact, writer_properties, ArtifactFile};
use super::{StorageBackend, StorageConfig, StorageError, StoreRequest};
use crate::config::ParquetConfig;
use crate::models::{ContentFingerprint, StoredArtifact};
use crate::partition::{parse_date, PartitionResolver, ARTIFACT_EXTENSION};

const STAGING_EXTENSION: &str = "tmp";

/// An artifact fully written to the staging area but not yet published.
///
/// Dropping it without calling [`LocalBackend::publish`] leaves an orphaned
/// staging file for [`StorageBackend::sweep_staging`] to remove.
#[derive(Debug)]
pub struct StagedArtifact {
    staging_path: PathBuf,
    artifact: StoredArtifact,
}

impl StagedArtifact {
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn artifact(&self) -> &StoredArtifact {
        &self.artifact
    }
}

/// Stores artifacts as Parquet files in a local directory tree.
pub struct LocalBackend {
    artifacts_dir: PathBuf,
    staging_dir: PathBuf,
    resolver: PartitionResolver,
    props: WriterProperties,
}

impl LocalBackend {
    pub fn new(
        config: &StorageConfig,
        resolver: PartitionResolver,
        parquet: &ParquetConfig,
    ) -> Result<Self, StorageError> {
        let artifacts_dir = ensure_dir(&config.artifacts_dir())?;
        let staging_dir = ensure_dir(&config.staging_dir())?;

        info!("LocalBackend initialized at {:?}", artifacts_dir);
        Ok(Self {
            artifacts_dir,
            staging_dir,
            resolver,
            props: writer_properties(parquet)?,
        })
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn resolver(&self) -> &PartitionResolver {
        &self.resolver
    }

    /// Absolute path of an artifact, rejecting anything that could leave the
    /// artifact root.
    pub fn absolute_path(&self, relative_path: &Path) -> Result<PathBuf, StorageError> {
        let safe = relative_path.components().count() > 0
            && relative_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(
                relative_path.display().to_string(),
            ));
        }
        Ok(self.artifacts_dir.join(relative_path))
    }

    /// First half of [`StorageBackend::store`]: encode and sync the artifact
    /// in the staging area.
    pub fn stage(&self, request: StoreRequest<'_>) -> Result<StagedArtifact, StorageError> {
        let now = Utc::now();
        let artifact = StoredArtifact {
            artifact_id: request.artifact_id.clone(),
            fingerprint: *request.fingerprint,
            partition_key: request.partition_key.clone(),
            relative_path: self
                .resolver
                .path_for(request.partition_key, request.artifact_id),
            size_bytes: request.payload.len() as u64,
            stored_at: DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis())
                .unwrap_or(now),
        };
        let metadata_json = serde_json::to_string(request.metadata)?;
        let record_date = request
            .metadata
            .date
            .as_deref()
            .and_then(|d| parse_date(d.trim()).ok());

        let staging_path = self
            .staging_dir
            .join(format!("{}.{}", Uuid::new_v4(), STAGING_EXTENSION));

        let written = File::create(&staging_path)
            .and_then(|file| {
                encode_staged(
                    file,
                    &artifact,
                    record_date,
                    &metadata_json,
                    request.payload,
                    self.props.clone(),
                )
            })
            .and_then(|file| file.sync_all());

        if let Err(source) = written {
            let _ = fs::remove_file(&staging_path);
            return Err(StorageError::Unwritable {
                path: staging_path,
                source,
            });
        }

        debug!(
            "Staged {} for {:?}",
            artifact.artifact_id, artifact.relative_path
        );
        Ok(StagedArtifact {
            staging_path,
            artifact,
        })
    }

    /// Second half of [`StorageBackend::store`]: atomically move the staged
    /// file into its partition.
    ///
    /// If the final path already holds the same content the call succeeds
    /// with the existing artifact. Different content is a conflict.
    pub fn publish(&self, staged: StagedArtifact) -> Result<StoredArtifact, StorageError> {
        let StagedArtifact {
            staging_path,
            artifact,
        } = staged;
        let final_path = self.absolute_path(&artifact.relative_path)?;

        let result = self.link_into_place(&staging_path, &final_path, &artifact);
        if let Err(e) = fs::remove_file(&staging_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove staging file {:?}: {}", staging_path, e);
            }
        }
        result
    }

    fn link_into_place(
        &self,
        staging_path: &Path,
        final_path: &Path,
        artifact: &StoredArtifact,
    ) -> Result<StoredArtifact, StorageError> {
        let parent = final_path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(final_path.display().to_string()))?;
        fs::create_dir_all(parent).map_err(|source| StorageError::Unwritable {
            path: parent.to_path_buf(),
            source,
        })?;

        match fs::hard_link(staging_path, final_path) {
            Ok(()) => {
                sync_dir(parent);
                debug!("Published {:?}", artifact.relative_path);
                Ok(artifact.clone())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.resolve_existing(final_path, artifact)
            }
            Err(source) => Err(StorageError::Unwritable {
                path: final_path.to_path_buf(),
                source,
            }),
        }
    }

    fn resolve_existing(
        &self,
        final_path: &Path,
        incoming: &StoredArtifact,
    ) -> Result<StoredArtifact, StorageError> {
        let existing = read_artifact(final_path)?;
        let existing_fp: ContentFingerprint = existing.artifact.fingerprint;

        if existing_fp == incoming.fingerprint {
            debug!(
                "Artifact already present at {:?}, keeping existing file",
                incoming.relative_path
            );
            return Ok(existing.artifact);
        }

        error!(
            "Partition conflict at {:?}: existing {} vs incoming {} ({})",
            incoming.relative_path,
            existing_fp.short(),
            incoming.fingerprint.short(),
            incoming.artifact_id
        );
        Err(StorageError::PartitionConflict {
            path: incoming.relative_path.clone(),
            existing: existing_fp,
            incoming: incoming.fingerprint,
        })
    }

    fn staging_files(&self) -> Result<Vec<(PathBuf, SystemTime)>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.staging_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STAGING_EXTENSION) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Removed concurrently
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            files.push((path, meta.modified()?));
        }
        Ok(files)
    }
}

impl StorageBackend for LocalBackend {
    fn store(&self, request: StoreRequest<'_>) -> Result<StoredArtifact, StorageError> {
        let staged = self.stage(request)?;
        self.publish(staged)
    }

    fn read_artifact(&self, relative_path: &Path) -> Result<ArtifactFile, StorageError> {
        let path = self.absolute_path(relative_path)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(relative_path.to_path_buf()));
        }
        read_artifact(&path)
    }

    fn exists(&self, relative_path: &Path) -> bool {
        self.absolute_path(relative_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    fn remove(&self, relative_path: &Path) -> Result<bool, StorageError> {
        let path = self.absolute_path(relative_path)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {:?}", relative_path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_artifacts(&self, prefix: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let root = if prefix.as_os_str().is_empty() {
            self.artifacts_dir.clone()
        } else {
            self.absolute_path(prefix)?
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let root_str = root
            .to_str()
            .ok_or_else(|| StorageError::InvalidPath(root.display().to_string()))?;
        let pattern = format!(
            "{}/**/*.{}",
            glob::Pattern::escape(root_str),
            ARTIFACT_EXTENSION
        );
        let entries =
            glob::glob(&pattern).map_err(|e| StorageError::InvalidPath(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StorageError::Io(e.into()))?;
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.artifacts_dir) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn locate(&self, relative_path: &Path) -> Result<String, StorageError> {
        let path = self.absolute_path(relative_path)?;
        path.to_str()
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))
    }

    fn sweep_staging(&self, max_age: Duration) -> Result<usize, StorageError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for (path, modified) in self.staging_files()? {
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed orphaned staging file {:?}", path);
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!("Swept {} orphaned staging files", removed);
        }
        Ok(removed)
    }

    fn staging_count(&self) -> Result<usize, StorageError> {
        Ok(self.staging_files()?.len())
    }
}

/// Create `dir` and return its canonical form.
/// Encode an artifact into a staging writer.
///
/// Every failure here is a failed write, whichever layer reports it.
fn encode_staged<W: Write + Send>(
    writer: W,
    artifact: &StoredArtifact,
    record_date: Option<NaiveDate>,
    metadata_json: &str,
    payload: &[u8],
    props: WriterProperties,
) -> io::Result<W> {
    write_artifact(
        writer,
        artifact,
        record_date,
        Some(metadata_json),
        payload,
        props,
    )
    .map_err(into_io_error)
}

fn into_io_error(e: StorageError) -> io::Error {
    match e {
        StorageError::Io(e) => e,
        StorageError::Parquet(ParquetError::External(inner)) => match inner.downcast::<io::Error>() {
            Ok(e) => *e,
            Err(inner) => io::Error::new(ErrorKind::Other, inner),
        },
        other => io::Error::new(ErrorKind::Other, other),
    }
}

fn ensure_dir(dir: &Path) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir)
        .and_then(|_| fs::canonicalize(dir))
        .map_err(|source| StorageError::Unwritable {
            path: dir.to_path_buf(),
            source,
        })
}

/// Persist a directory entry after a link.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!("Failed to sync directory {:?}: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
