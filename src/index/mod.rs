//! Persistent dedup index.
//!
//! Maps content fingerprints to their first-seen record. A fingerprint moves
//! `Unknown -> Pending -> Committed`:
//!
//! - [`DedupIndex::check_and_register`] atomically inserts a pending row, or
//!   reports the existing one. A pending row older than the grace period is
//!   taken over by the new caller in the same transaction.
//! - [`DedupIndex::finalize`] commits the row once the artifact is on disk.
//!   Only the holder of the current [`Claim`] may finalize.
//! - [`DedupIndex::reclaim_expired`] drops stale pending rows so their
//!   content can be reprocessed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::{params, Connection, Row};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Database, DbError};
use crate::models::{ArtifactId, ContentFingerprint, DedupRecord, DedupState, PartitionKey};

/// Errors from the dedup index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index could not be read or written; safe to retry.
    #[error("dedup index unavailable: {0}")]
    Unavailable(#[from] DbError),

    /// A stored row violates the index invariants.
    #[error("dedup index corruption for {fingerprint}: {reason}")]
    Corruption { fingerprint: String, reason: String },

    /// The pending registration was reclaimed by another caller.
    #[error("claim on {fingerprint} is no longer held")]
    ClaimLost { fingerprint: ContentFingerprint },
}

impl From<duckdb::Error> for IndexError {
    fn from(e: duckdb::Error) -> Self {
        IndexError::Unavailable(DbError::Engine(e))
    }
}

/// Proof of a successful registration, required to finalize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub fingerprint: ContentFingerprint,
    pub claim_id: Uuid,
    pub registered_at: DateTime<Utc>,
}

/// Result of [`DedupIndex::check_and_register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The caller owns this fingerprint and should store the artifact.
    Inserted(Claim),
    /// Someone registered this fingerprint first.
    AlreadyExists(DedupRecord),
}

/// A pending row together with its claim, for recovery.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub record: DedupRecord,
    pub claim: Claim,
}

/// Row counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounts {
    pub pending: u64,
    pub committed: u64,
}

const SELECT_COLUMNS: &str = "fingerprint, artifact_id, partition_key, state, claim_id, \
     first_seen_at, committed_at, storage_path";

/// Row as stored, before validation.
struct RawRow {
    fingerprint: String,
    artifact_id: String,
    partition_key: String,
    state: String,
    claim_id: String,
    first_seen_at: i64,
    committed_at: Option<i64>,
    storage_path: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            fingerprint: row.get(0)?,
            artifact_id: row.get(1)?,
            partition_key: row.get(2)?,
            state: row.get(3)?,
            claim_id: row.get(4)?,
            first_seen_at: row.get(5)?,
            committed_at: row.get(6)?,
            storage_path: row.get(7)?,
        })
    }

    fn corruption(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Corruption {
            fingerprint: self.fingerprint.clone(),
            reason: reason.into(),
        }
    }

    fn decode(self) -> Result<PendingEntry, IndexError> {
        let fingerprint: ContentFingerprint = self
            .fingerprint
            .parse()
            .map_err(|e| self.corruption(format!("bad fingerprint: {}", e)))?;
        let artifact_id = ArtifactId::new(self.artifact_id.clone())
            .map_err(|e| self.corruption(format!("bad artifact id: {}", e)))?;
        let partition_key = PartitionKey::from_json(&self.partition_key)
            .map_err(|e| self.corruption(format!("bad partition key: {}", e)))?;
        let state: DedupState = self.state.parse().map_err(|e: String| self.corruption(e))?;
        let claim_id = Uuid::parse_str(&self.claim_id)
            .map_err(|e| self.corruption(format!("bad claim id: {}", e)))?;
        let first_seen_at = from_millis(self.first_seen_at)
            .ok_or_else(|| self.corruption("first_seen_at out of range"))?;
        let committed_at = match self.committed_at {
            Some(ms) => {
                Some(from_millis(ms).ok_or_else(|| self.corruption("committed_at out of range"))?)
            }
            None => None,
        };
        let storage_path = self.storage_path.clone().map(PathBuf::from);

        match state {
            DedupState::Committed if storage_path.is_none() || committed_at.is_none() => {
                return Err(self.corruption("committed without a storage path"));
            }
            DedupState::Pending if storage_path.is_some() => {
                return Err(self.corruption("pending with a storage path"));
            }
            _ => {}
        }

        Ok(PendingEntry {
            claim: Claim {
                fingerprint,
                claim_id,
                registered_at: first_seen_at,
            },
            record: DedupRecord {
                fingerprint,
                artifact_id,
                partition_key,
                state,
                first_seen_at,
                committed_at,
                storage_path,
            },
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn fetch(conn: &Connection, fingerprint: &ContentFingerprint) -> Result<Option<PendingEntry>, IndexError> {
    let sql = format!("SELECT {} FROM dedup_index WHERE fingerprint = ?", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![fingerprint.to_hex()])?;
    match rows.next()? {
        Some(row) => Ok(Some(RawRow::from_row(row)?.decode()?)),
        None => Ok(None),
    }
}

fn fetch_pending_before(conn: &Connection, cutoff_ms: i64) -> Result<Vec<PendingEntry>, IndexError> {
    let sql = format!(
        "SELECT {} FROM dedup_index WHERE state = 'pending' AND first_seen_at <= ? ORDER BY first_seen_at",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![cutoff_ms])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(RawRow::from_row(row)?.decode()?);
    }
    Ok(entries)
}

/// Handle to the dedup index table.
#[derive(Debug, Clone)]
pub struct DedupIndex {
    db: Arc<Database>,
    pending_grace: Duration,
}

impl DedupIndex {
    pub fn new(db: Arc<Database>, pending_grace: Duration) -> Self {
        Self { db, pending_grace }
    }

    pub fn pending_grace(&self) -> Duration {
        self.pending_grace
    }

    /// Atomically register `fingerprint` or report who already did.
    ///
    /// At most one caller receives `Inserted` per fingerprint. A pending row
    /// older than the grace period is taken over and also yields `Inserted`.
    pub fn check_and_register(
        &self,
        fingerprint: &ContentFingerprint,
        artifact_id: &ArtifactId,
        partition_key: &PartitionKey,
    ) -> Result<RegisterOutcome, IndexError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let claim = Claim {
            fingerprint: *fingerprint,
            claim_id: Uuid::new_v4(),
            registered_at: from_millis(now_ms).unwrap_or(now),
        };

        let mut conn = self.db.writer()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO dedup_index
                 (fingerprint, artifact_id, partition_key, state, claim_id, first_seen_at)
             VALUES (?, ?, ?, 'pending', ?, ?)
             ON CONFLICT DO NOTHING",
            params![
                fingerprint.to_hex(),
                artifact_id.as_str(),
                partition_key.to_json(),
                claim.claim_id.to_string(),
                now_ms
            ],
        )?;
        if inserted == 1 {
            tx.commit()?;
            debug!("Registered {} as {}", fingerprint.short(), artifact_id);
            return Ok(RegisterOutcome::Inserted(claim));
        }

        let cutoff_ms = now_ms.saturating_sub(duration_millis(self.pending_grace));
        let reclaimed = tx.execute(
            "UPDATE dedup_index
             SET artifact_id = ?, partition_key = ?, claim_id = ?, first_seen_at = ?
             WHERE fingerprint = ? AND state = 'pending' AND first_seen_at <= ?",
            params![
                artifact_id.as_str(),
                partition_key.to_json(),
                claim.claim_id.to_string(),
                now_ms,
                fingerprint.to_hex(),
                cutoff_ms
            ],
        )?;
        if reclaimed == 1 {
            tx.commit()?;
            warn!(
                "Took over stale pending registration for {} as {}",
                fingerprint.short(),
                artifact_id
            );
            return Ok(RegisterOutcome::Inserted(claim));
        }

        let existing = fetch(&tx, fingerprint)?.ok_or_else(|| IndexError::Corruption {
            fingerprint: fingerprint.to_hex(),
            reason: "insert conflicted but no row exists".to_string(),
        })?;
        tx.commit()?;
        debug!(
            "Fingerprint {} already {}",
            fingerprint.short(),
            existing.record.state
        );
        Ok(RegisterOutcome::AlreadyExists(existing.record))
    }

    /// Read-only lookup; never waits on the writer.
    pub fn lookup(&self, fingerprint: &ContentFingerprint) -> Result<Option<DedupRecord>, IndexError> {
        self.db
            .read(|conn| fetch(conn, fingerprint))
            .map(|entry| entry.map(|e| e.record))
    }

    /// Commit a pending registration once its artifact is on disk.
    ///
    /// Repeating a finalize with the same claim and path returns the
    /// committed record unchanged.
    pub fn finalize(&self, claim: &Claim, storage_path: &Path) -> Result<DedupRecord, IndexError> {
        let fingerprint = &claim.fingerprint;
        let path_str = storage_path.to_string_lossy().to_string();
        let now_ms = Utc::now().timestamp_millis();

        let mut conn = self.db.writer()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE dedup_index
             SET state = 'committed', committed_at = ?, storage_path = ?
             WHERE fingerprint = ? AND claim_id = ? AND state = 'pending'",
            params![
                now_ms,
                path_str,
                fingerprint.to_hex(),
                claim.claim_id.to_string()
            ],
        )?;

        let current = fetch(&tx, fingerprint)?;
        tx.commit()?;

        match current {
            Some(entry)
                if entry.claim.claim_id == claim.claim_id
                    && entry.record.is_committed()
                    && entry.record.storage_path.as_deref() == Some(storage_path) =>
            {
                if updated == 1 {
                    debug!("Committed {} at {:?}", fingerprint.short(), storage_path);
                }
                Ok(entry.record)
            }
            _ => Err(IndexError::ClaimLost {
                fingerprint: *fingerprint,
            }),
        }
    }

    /// Release the caller's own pending registration after a failed store.
    ///
    /// Returns `false` if the claim was already lost or committed.
    pub fn abandon(&self, claim: &Claim) -> Result<bool, IndexError> {
        let conn = self.db.writer()?;
        let deleted = conn.execute(
            "DELETE FROM dedup_index WHERE fingerprint = ? AND claim_id = ? AND state = 'pending'",
            params![claim.fingerprint.to_hex(), claim.claim_id.to_string()],
        )?;
        if deleted == 1 {
            debug!("Abandoned registration for {}", claim.fingerprint.short());
        }
        Ok(deleted == 1)
    }

    /// Pending rows registered at least `older_than` ago.
    pub fn pending_older_than(&self, older_than: Duration) -> Result<Vec<PendingEntry>, IndexError> {
        let cutoff_ms = Utc::now()
            .timestamp_millis()
            .saturating_sub(duration_millis(older_than));
        self.db.read(|conn| fetch_pending_before(conn, cutoff_ms))
    }

    /// Delete pending rows older than `older_than`, returning them.
    ///
    /// Their fingerprints become `Unknown` and may be registered again.
    pub fn reclaim_expired(&self, older_than: Duration) -> Result<Vec<DedupRecord>, IndexError> {
        let cutoff_ms = Utc::now()
            .timestamp_millis()
            .saturating_sub(duration_millis(older_than));

        let mut conn = self.db.writer()?;
        let tx = conn.transaction()?;
        let expired = fetch_pending_before(&tx, cutoff_ms)?;
        for entry in &expired {
            tx.execute(
                "DELETE FROM dedup_index WHERE fingerprint = ? AND claim_id = ? AND state = 'pending'",
                params![
                    entry.record.fingerprint.to_hex(),
                    entry.claim.claim_id.to_string()
                ],
            )?;
        }
        tx.commit()?;

        for entry in &expired {
            warn!(
                "Reclaimed pending registration for {} ({}) from {}",
                entry.record.fingerprint.short(),
                entry.record.artifact_id,
                entry.record.first_seen_at
            );
        }
        if !expired.is_empty() {
            info!("Reclaimed {} expired pending registrations", expired.len());
        }
        Ok(expired.into_iter().map(|e| e.record).collect())
    }

    /// Remove a fingerprint regardless of state. Operator use only: the
    /// artifact file, if any, is left alone.
    pub fn purge(&self, fingerprint: &ContentFingerprint) -> Result<bool, IndexError> {
        let conn = self.db.writer()?;
        let deleted = conn.execute(
            "DELETE FROM dedup_index WHERE fingerprint = ?",
            params![fingerprint.to_hex()],
        )?;
        if deleted == 1 {
            info!("Purged {} from dedup index", fingerprint.short());
        }
        Ok(deleted == 1)
    }

    pub fn counts(&self) -> Result<IndexCounts, IndexError> {
        self.db.read(|conn| -> Result<IndexCounts, IndexError> {
            let mut stmt =
                conn.prepare("SELECT state, COUNT(*) FROM dedup_index GROUP BY state")?;
            let mut rows = stmt.query([])?;
            let mut counts = IndexCounts::default();
            while let Some(row) = rows.next()? {
                let state: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                match state.parse::<DedupState>() {
                    Ok(DedupState::Pending) => counts.pending = n as u64,
                    Ok(DedupState::Committed) => counts.committed = n as u64,
                    Err(reason) => {
                        return Err(IndexError::Corruption {
                            fingerprint: "*".to_string(),
                            reason,
                        })
                    }
                }
            }
            Ok(counts)
        })
    }

    /// Distinct partition keys with at least one committed artifact.
    pub fn committed_partitions(&self) -> Result<Vec<PartitionKey>, IndexError> {
        self.db.read(|conn| -> Result<Vec<PartitionKey>, IndexError> {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT partition_key FROM dedup_index
                 WHERE state = 'committed' ORDER BY partition_key",
            )?;
            let mut rows = stmt.query([])?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                let key = PartitionKey::from_json(&raw).map_err(|e| IndexError::Corruption {
                    fingerprint: "*".to_string(),
                    reason: format!("bad partition key {}: {}", raw, e),
                })?;
                keys.push(key);
            }
            keys.sort();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fingerprint, PartitionSegment};
    use std::sync::Barrier;
    use std::thread;

    fn test_index(grace: Duration) -> DedupIndex {
        DedupIndex::new(Arc::new(Database::open_in_memory().unwrap()), grace)
    }

    fn key(source: &str) -> PartitionKey {
        PartitionKey::new(vec![
            PartitionSegment::new("year", "2024"),
            PartitionSegment::new("month", "01"),
            PartitionSegment::new("source", source),
        ])
    }

    fn id(s: &str) -> ArtifactId {
        ArtifactId::new(s).unwrap()
    }

    fn expect_inserted(outcome: RegisterOutcome) -> Claim {
        match outcome {
            RegisterOutcome::Inserted(claim) => claim,
            other => panic!("expected Inserted, got {:?}", other),
        }
    }

    #[test]
    fn test_register_then_duplicate() {
        let index = test_index(Duration::from_secs(60));
        let fp = fingerprint(b"hello");

        let claim = expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());
        assert_eq!(claim.fingerprint, fp);

        match index.check_and_register(&fp, &id("a2"), &key("b")).unwrap() {
            RegisterOutcome::AlreadyExists(record) => {
                assert_eq!(record.state, DedupState::Pending);
                assert_eq!(record.artifact_id, id("a1"));
                assert_eq!(record.partition_key, key("a"));
                assert_eq!(record.storage_path, None);
            }
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_unknown_is_none() {
        let index = test_index(Duration::from_secs(60));
        assert_eq!(index.lookup(&fingerprint(b"nope")).unwrap(), None);
    }

    #[test]
    fn test_finalize_commits() {
        let index = test_index(Duration::from_secs(60));
        let fp = fingerprint(b"hello");
        let claim = expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());

        let path = PathBuf::from("year=2024/month=01/source=a/a1.parquet");
        let record = index.finalize(&claim, &path).unwrap();
        assert!(record.is_committed());
        assert_eq!(record.storage_path.as_deref(), Some(path.as_path()));
        assert!(record.committed_at.is_some());

        let looked_up = index.lookup(&fp).unwrap().unwrap();
        assert_eq!(looked_up, record);

        // Idempotent with the same claim and path
        assert_eq!(index.finalize(&claim, &path).unwrap(), record);

        match index.check_and_register(&fp, &id("a2"), &key("a")).unwrap() {
            RegisterOutcome::AlreadyExists(existing) => assert_eq!(existing, record),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_finalize_with_foreign_claim_fails() {
        let index = test_index(Duration::from_secs(60));
        let fp = fingerprint(b"hello");
        let mut claim =
            expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());
        claim.claim_id = Uuid::new_v4();

        let result = index.finalize(&claim, Path::new("x.parquet"));
        assert!(matches!(result, Err(IndexError::ClaimLost { .. })));
        assert_eq!(index.lookup(&fp).unwrap().unwrap().state, DedupState::Pending);
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let index = Arc::new(test_index(Duration::from_secs(60)));
        let fp = fingerprint(b"contended payload");
        let workers = 16;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    index
                        .check_and_register(&fp, &id(&format!("worker-{}", i)), &key("a"))
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<RegisterOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes
            .iter()
            .filter(|o| matches!(o, RegisterOutcome::Inserted(_)))
            .count();
        let existing = outcomes
            .iter()
            .filter(|o| matches!(o, RegisterOutcome::AlreadyExists(_)))
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(existing, workers - 1);
        assert_eq!(
            index.counts().unwrap(),
            IndexCounts {
                pending: 1,
                committed: 0
            }
        );
    }

    #[test]
    fn test_stale_pending_is_taken_over() {
        let index = test_index(Duration::from_millis(50));
        let fp = fingerprint(b"stuck");
        let first = expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());

        // Within grace: still a duplicate
        assert!(matches!(
            index.check_and_register(&fp, &id("a2"), &key("a")).unwrap(),
            RegisterOutcome::AlreadyExists(_)
        ));

        thread::sleep(Duration::from_millis(120));

        let second = expect_inserted(index.check_and_register(&fp, &id("a2"), &key("a")).unwrap());
        assert_ne!(first.claim_id, second.claim_id);

        // The original holder can no longer commit
        assert!(matches!(
            index.finalize(&first, Path::new("a1.parquet")),
            Err(IndexError::ClaimLost { .. })
        ));
        let record = index.finalize(&second, Path::new("a2.parquet")).unwrap();
        assert_eq!(record.artifact_id, id("a2"));
    }

    #[test]
    fn test_committed_is_never_taken_over() {
        let index = test_index(Duration::from_millis(10));
        let fp = fingerprint(b"done");
        let claim = expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());
        index.finalize(&claim, Path::new("a1.parquet")).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(matches!(
            index.check_and_register(&fp, &id("a2"), &key("a")).unwrap(),
            RegisterOutcome::AlreadyExists(r) if r.is_committed()
        ));
        assert!(index.reclaim_expired(Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_reclaim_expired() {
        let index = test_index(Duration::from_secs(60));
        let stale = fingerprint(b"stale");
        expect_inserted(index.check_and_register(&stale, &id("s"), &key("a")).unwrap());

        assert!(index
            .reclaim_expired(Duration::from_secs(3600))
            .unwrap()
            .is_empty());

        thread::sleep(Duration::from_millis(20));
        let reclaimed = index.reclaim_expired(Duration::from_millis(10)).unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].fingerprint, stale);
        assert_eq!(index.lookup(&stale).unwrap(), None);

        // Re-registerable afterwards
        expect_inserted(index.check_and_register(&stale, &id("s"), &key("a")).unwrap());
    }

    #[test]
    fn test_abandon_releases_registration() {
        let index = test_index(Duration::from_secs(60));
        let fp = fingerprint(b"failed write");
        let claim = expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());

        assert!(index.abandon(&claim).unwrap());
        assert!(!index.abandon(&claim).unwrap());
        assert_eq!(index.lookup(&fp).unwrap(), None);
        expect_inserted(index.check_and_register(&fp, &id("a1"), &key("a")).unwrap());
    }

    #[test]
    fn test_pending_older_than_lists_claims() {
        let index = test_index(Duration::from_secs(60));
        let fp = fingerprint(b"p");
        let claim = expect_inserted(index.check_and_register(&fp, &id("p"), &key("a")).unwrap());

        let pending = index.pending_older_than(Duration::ZERO).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].claim.claim_id, claim.claim_id);
        assert_eq!(pending[0].record.artifact_id, id("p"));
    }

    #[test]
    fn test_purge_and_counts() {
        let index = test_index(Duration::from_secs(60));
        let a = fingerprint(b"a");
        let b = fingerprint(b"b");
        let claim_a = expect_inserted(index.check_and_register(&a, &id("a"), &key("a")).unwrap());
        expect_inserted(index.check_and_register(&b, &id("b"), &key("b")).unwrap());
        index.finalize(&claim_a, Path::new("a.parquet")).unwrap();

        assert_eq!(
            index.counts().unwrap(),
            IndexCounts {
                pending: 1,
                committed: 1
            }
        );
        assert_eq!(index.committed_partitions().unwrap(), vec![key("a")]);

        assert!(index.purge(&a).unwrap());
        assert!(!index.purge(&a).unwrap());
        assert_eq!(index.counts().unwrap().committed, 0);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let index = DedupIndex::new(Arc::clone(&db), Duration::from_secs(60));
        let fp = fingerprint(b"x");
        db.writer()
            .unwrap()
            .execute(
                "INSERT INTO dedup_index VALUES (?, 'x', '[]', 'committed', ?, 1, 1, NULL)",
                params![fp.to_hex(), Uuid::new_v4().to_string()],
            )
            .unwrap();

        assert!(matches!(
            index.lookup(&fp),
            Err(IndexError::Corruption { .. })
        ));
    }
}
