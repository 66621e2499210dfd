//! Read-only query facade over the partitioned artifact tree.
//!
//! Queries list the Parquet files under the directory matching the partition
//! filter and scan them through DuckDB's `read_parquet`. Nothing is cached:
//! every [`Catalog::query`] call lists the tree again, so artifacts published
//! since the last call are visible.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{Connection, Row};
use thiserror::Error;
use tracing::debug;

use crate::db::{Database, DbError};
use crate::index::{DedupIndex, IndexError};
use crate::models::{ArtifactId, ContentFingerprint, PartitionKey, StoredArtifact};
use crate::partition::{date_period, PartitionResolver};
use crate::storage::parquet::columns;
use crate::storage::{StorageBackend, StorageError};

/// Errors from catalog queries.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("query engine error: {0}")]
    Engine(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// A scanned row does not decode into an artifact.
    #[error("corrupt catalog row in {path}: {reason}")]
    Corruption { path: String, reason: String },
}

impl From<duckdb::Error> for CatalogError {
    fn from(e: duckdb::Error) -> Self {
        CatalogError::Engine(DbError::Engine(e))
    }
}

/// Which partitions a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionFilter {
    #[default]
    All,
    /// Keys whose leading values equal these, e.g. `["2024", "01"]`.
    /// A complete key selects exactly that partition.
    Prefix(Vec<String>),
    /// Records dated within `start..=end`; an open bound is unlimited.
    /// Directories are pruned through the date segments and each record's
    /// own date decides.
    DateRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl PartitionFilter {
    pub fn prefix<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionFilter::Prefix(values.into_iter().map(Into::into).collect())
    }

    pub fn exact(key: &PartitionKey) -> Self {
        Self::prefix(key.values())
    }

    pub fn dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        PartitionFilter::DateRange { start, end }
    }

    /// Whether a partition can hold matching records.
    pub fn matches(&self, key: &PartitionKey) -> bool {
        match self {
            PartitionFilter::All => true,
            PartitionFilter::Prefix(values) => key.starts_with(values),
            PartitionFilter::DateRange { start, end } => {
                let segments = key
                    .segments()
                    .iter()
                    .map(|s| (s.name.as_str(), s.value.as_str()));
                date_period(segments).is_some_and(|period| overlaps(period, *start, *end))
            }
        }
    }

    fn is_empty_range(&self) -> bool {
        matches!(
            self,
            PartitionFilter::DateRange { start: Some(s), end: Some(e) } if s > e
        )
    }

    /// SQL predicate on the scanned files, if any.
    fn where_clause(&self) -> Option<String> {
        let PartitionFilter::DateRange { start, end } = self else {
            return None;
        };
        let mut predicates = Vec::new();
        if let Some(start) = start {
            predicates.push(format!(
                "{} >= DATE '{}'",
                columns::RECORD_DATE,
                start.format("%Y-%m-%d")
            ));
        }
        if let Some(end) = end {
            predicates.push(format!(
                "{} <= DATE '{}'",
                columns::RECORD_DATE,
                end.format("%Y-%m-%d")
            ));
        }
        if predicates.is_empty() {
            None
        } else {
            Some(format!(" WHERE {}", predicates.join(" AND ")))
        }
    }
}

fn overlaps(
    (first, last): (NaiveDate, NaiveDate),
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> bool {
    start.map_or(true, |s| last >= s) && end.map_or(true, |e| first <= e)
}

fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Read-only view of committed artifacts.
pub struct Catalog {
    db: Arc<Database>,
    backend: Arc<dyn StorageBackend>,
    resolver: PartitionResolver,
    index: DedupIndex,
    page_size: usize,
}

impl Catalog {
    pub fn new(
        db: Arc<Database>,
        backend: Arc<dyn StorageBackend>,
        resolver: PartitionResolver,
        index: DedupIndex,
        page_size: usize,
    ) -> Self {
        Self {
            db,
            backend,
            resolver,
            index,
            page_size: page_size.max(1),
        }
    }

    /// Artifact files selected by `filter`, as engine locations.
    fn locations(&self, filter: &PartitionFilter) -> Result<Vec<String>, CatalogError> {
        if filter.is_empty_range() {
            return Ok(Vec::new());
        }
        let dir = match filter {
            PartitionFilter::All => PathBuf::new(),
            PartitionFilter::Prefix(values) => {
                if values.len() > self.resolver.scheme().segment_names().len() {
                    return Ok(Vec::new());
                }
                self.resolver.dir_for_prefix(values)
            }
            PartitionFilter::DateRange {
                start: Some(start),
                end: Some(end),
            } => self.resolver.dir_for_date_range(*start, *end),
            PartitionFilter::DateRange { .. } => PathBuf::new(),
        };

        let mut files = self.backend.list_artifacts(&dir)?;
        if let PartitionFilter::DateRange { start, end } = filter {
            files.retain(|f| {
                self.resolver
                    .period_of_path(f)
                    .is_some_and(|period| overlaps(period, *start, *end))
            });
        }
        let locations = files
            .iter()
            .map(|f| self.backend.locate(f))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Catalog filter {:?} covers {} files", filter, locations.len());
        Ok(locations)
    }

    fn scan_source(locations: &[String]) -> String {
        let list: Vec<String> = locations.iter().map(|l| sql_literal(l)).collect();
        format!("read_parquet([{}])", list.join(", "))
    }

    /// Lazily iterate the artifacts selected by `filter`, ordered by
    /// relative path.
    pub fn query(&self, filter: &PartitionFilter) -> Result<ArtifactIter, CatalogError> {
        self.query_with_limit(filter, None)
    }

    /// Like [`Catalog::query`], stopping after `limit` artifacts.
    pub fn query_with_limit(
        &self,
        filter: &PartitionFilter,
        limit: Option<usize>,
    ) -> Result<ArtifactIter, CatalogError> {
        let locations = self.locations(filter)?;
        if locations.is_empty() || limit == Some(0) {
            return Ok(ArtifactIter::empty());
        }

        let sql = format!(
            "SELECT {artifact_id}, {fingerprint}, {partition_key}, {relative_path}, \
                    CAST({size_bytes} AS BIGINT), epoch_ms({stored_at}) \
             FROM {source}{filter} ORDER BY {relative_path}",
            artifact_id = columns::ARTIFACT_ID,
            fingerprint = columns::FINGERPRINT,
            partition_key = columns::PARTITION_KEY,
            relative_path = columns::RELATIVE_PATH,
            size_bytes = columns::SIZE_BYTES,
            stored_at = columns::STORED_AT,
            source = Self::scan_source(&locations),
            filter = filter.where_clause().unwrap_or_default(),
        );

        Ok(ArtifactIter {
            conn: Some(self.db.reader()?),
            sql,
            page_size: self.page_size,
            offset: 0,
            remaining: limit,
            buffer: VecDeque::new(),
        })
    }

    /// Number of artifacts in the partitions selected by `filter`.
    pub fn count(&self, filter: &PartitionFilter) -> Result<u64, CatalogError> {
        let locations = self.locations(filter)?;
        if locations.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            Self::scan_source(&locations),
            filter.where_clause().unwrap_or_default()
        );
        let n: i64 = self
            .db
            .read(|conn| conn.query_row(&sql, [], |row| row.get(0)).map_err(CatalogError::from))?;
        Ok(n as u64)
    }

    /// Partition keys holding at least one committed artifact.
    pub fn partitions(&self) -> Result<Vec<PartitionKey>, CatalogError> {
        Ok(self.index.committed_partitions()?)
    }

    /// Payload bytes of an artifact returned by [`Catalog::query`].
    pub fn payload(&self, artifact: &StoredArtifact) -> Result<Vec<u8>, CatalogError> {
        Ok(self.backend.read_payload(&artifact.relative_path)?)
    }
}

/// Lazy, finite sequence of artifacts, fetched from the engine page by page.
pub struct ArtifactIter {
    conn: Option<Connection>,
    sql: String,
    page_size: usize,
    offset: usize,
    remaining: Option<usize>,
    buffer: VecDeque<StoredArtifact>,
}

impl ArtifactIter {
    fn empty() -> Self {
        Self {
            conn: None,
            sql: String::new(),
            page_size: 1,
            offset: 0,
            remaining: None,
            buffer: VecDeque::new(),
        }
    }

    fn fetch_page(&mut self) -> Result<(), CatalogError> {
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        if want == 0 {
            self.conn = None;
            return Ok(());
        }
        let Some(conn) = self.conn.as_ref() else {
            return Ok(());
        };

        let sql = format!("{} LIMIT {} OFFSET {}", self.sql, want, self.offset);
        let mut page = Vec::new();
        {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                page.push(decode_row(row)?);
            }
        }

        let fetched = page.len();
        self.buffer.extend(page);
        self.offset += fetched;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(fetched);
        }
        if fetched < want || self.remaining == Some(0) {
            self.conn = None;
        }
        Ok(())
    }
}

impl Iterator for ArtifactIter {
    type Item = Result<StoredArtifact, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fetch_page() {
                self.conn = None;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn decode_row(row: &Row<'_>) -> Result<StoredArtifact, CatalogError> {
    let artifact_id: String = row.get(0)?;
    let fingerprint: String = row.get(1)?;
    let partition_key: String = row.get(2)?;
    let relative_path: String = row.get(3)?;
    let size_bytes: i64 = row.get(4)?;
    let stored_at_ms: i64 = row.get(5)?;

    let corruption = |reason: String| CatalogError::Corruption {
        path: relative_path.clone(),
        reason,
    };

    Ok(StoredArtifact {
        artifact_id: ArtifactId::new(artifact_id)
            .map_err(|e| corruption(format!("bad artifact id: {}", e)))?,
        fingerprint: fingerprint
            .parse::<ContentFingerprint>()
            .map_err(|e| corruption(format!("bad fingerprint: {}", e)))?,
        partition_key: PartitionKey::from_json(&partition_key)
            .map_err(|e| corruption(format!("bad partition key: {}", e)))?,
        size_bytes: u64::try_from(size_bytes)
            .map_err(|_| corruption(format!("negative size {}", size_bytes)))?,
        stored_at: DateTime::<Utc>::from_timestamp_millis(stored_at_ms)
            .ok_or_else(|| corruption(format!("stored_at {} out of range", stored_at_ms)))?,
        relative_path: Path::new(&relative_path).to_path_buf(),
    })
}
