//! Embedded DuckDB handle.
//!
//! One database file holds the dedup index. All mutation goes through a single
//! writer connection guarded by a mutex; readers borrow cloned connections
//! from a small pool so lookups and catalog scans never wait on a writer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use duckdb::Connection;
use thiserror::Error;
use tracing::{debug, info};

/// Idle reader connections kept around for reuse.
const MAX_IDLE_READERS: usize = 8;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dedup_index (
    fingerprint     VARCHAR PRIMARY KEY,
    artifact_id     VARCHAR NOT NULL,
    partition_key   VARCHAR NOT NULL,
    state           VARCHAR NOT NULL,
    claim_id        VARCHAR NOT NULL,
    first_seen_at   BIGINT NOT NULL,
    committed_at    BIGINT,
    storage_path    VARCHAR
);
";

/// Errors opening or using the engine.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: duckdb::Error,
    },

    #[error("database error: {0}")]
    Engine(#[from] duckdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DuckDB's file lock does not cover a second open from the same process.
    #[error("database {0} is already open in this process")]
    AlreadyOpen(PathBuf),

    #[error("connection lock poisoned")]
    Poisoned,
}

/// Database files currently open in this process.
fn open_files() -> &'static Mutex<HashSet<PathBuf>> {
    static OPEN_FILES: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_FILES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Registration of a database file in [`open_files`], released on drop.
#[derive(Debug)]
struct OpenFile(PathBuf);

impl OpenFile {
    fn register(path: &Path) -> Result<Self, DbError> {
        let mut open = open_files().lock().map_err(|_| DbError::Poisoned)?;
        if !open.insert(path.to_path_buf()) {
            return Err(DbError::AlreadyOpen(path.to_path_buf()));
        }
        Ok(Self(path.to_path_buf()))
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let Ok(mut open) = open_files().lock() {
            open.remove(&self.0);
        }
    }
}

/// Absolute form of `path`, resolving symlinks in its directory.
fn canonical_file_path(path: &Path) -> Result<PathBuf, DbError> {
    let file_name = path.file_name().ok_or_else(|| {
        DbError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{:?} does not name a file", path),
        ))
    })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(std::fs::canonicalize(parent)?.join(file_name))
}

/// Shared handle to the DuckDB file.
pub struct Database {
    path: Option<PathBuf>,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    // Dropped after the connections.
    _open_file: Option<OpenFile>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    ///
    /// The file has a single owner: a second open from this process fails
    /// with [`DbError::AlreadyOpen`] until the first handle is dropped, and
    /// DuckDB's OS lock makes an open from another process fail with
    /// [`DbError::Open`].
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let open_file = OpenFile::register(&canonical_file_path(path)?)?;

        let conn = Connection::open(path).map_err(|source| DbError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened database at {:?}", path);
        Ok(Self::from_connection(
            conn,
            Some(path.to_path_buf()),
            Some(open_file),
        ))
    }

    /// In-memory database, for tests and throwaway pipelines.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, None, None))
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        open_file: Option<OpenFile>,
    ) -> Self {
        Self {
            path,
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            _open_file: open_file,
        }
    }

    /// Path of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Exclusive access to the writer connection.
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.writer.lock().map_err(|_| DbError::Poisoned)
    }

    /// Run `f` on a reader connection.
    ///
    /// The connection sees its own snapshot for the duration of each
    /// statement and is returned to the pool afterwards.
    pub(crate) fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let conn = self.checkout_reader()?;
        let result = f(&conn);
        self.checkin_reader(conn);
        result
    }

    /// A dedicated reader connection owned by the caller.
    pub(crate) fn reader(&self) -> Result<Connection, DbError> {
        self.checkout_reader()
    }

    fn checkout_reader(&self) -> Result<Connection, DbError> {
        let pooled = self
            .readers
            .lock()
            .map_err(|_| DbError::Poisoned)?
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => {
                // Cloning only needs the writer lock for the handle copy.
                let conn = self.writer()?.try_clone()?;
                debug!("Opened new reader connection");
                Ok(conn)
            }
        }
    }

    fn checkin_reader(&self, conn: Connection) {
        if let Ok(mut pool) = self.readers.lock() {
            if pool.len() < MAX_IDLE_READERS {
                pool.push(conn);
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_file_and_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("lake.duckdb");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));

        let count: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dedup_index", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lake.duckdb");

        {
            let db = Database::open(&path).unwrap();
            db.writer()
                .unwrap()
                .execute(
                    "INSERT INTO dedup_index VALUES ('f', 'a', '[]', 'pending', 'c', 1, NULL, NULL)",
                    [],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dedup_index", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_second_open_in_process_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lake.duckdb");

        let first = Database::open(&path).unwrap();
        assert!(matches!(
            Database::open(&path),
            Err(DbError::AlreadyOpen(_))
        ));

        // Same file through a different spelling.
        let dotted = temp_dir.path().join(".").join("lake.duckdb");
        assert!(matches!(
            Database::open(&dotted),
            Err(DbError::AlreadyOpen(_))
        ));

        drop(first);
        assert!(Database::open(&path).is_ok());
    }

    #[test]
    fn test_readers_see_committed_writes() {
        let db = Database::open_in_memory().unwrap();
        // Warm the pool before writing
        let _: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dedup_index", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .unwrap();

        db.writer()
            .unwrap()
            .execute(
                "INSERT INTO dedup_index VALUES ('f', 'a', '[]', 'pending', 'c', 1, NULL, NULL)",
                [],
            )
            .unwrap();

        let count: i64 = db
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM dedup_index", [], |row| row.get(0))
                    .map_err(DbError::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
