//! SQLite connection shared by the API server and the indexing job.
//!
//! `serve` only reads the store while `index-tiles` may be writing it from
//! another process, so on-disk connections wait on a locked database for
//! [`BUSY_TIMEOUT`] instead of failing with `SQLITE_BUSY`.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::info;

use aher_core::error::AherError;

use crate::migrations;

/// How long a statement waits for another process's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> AherError + '_ {
    move |e| AherError::Storage(format!("{}: {}", context, e))
}

/// One SQLite connection behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at `path`, creating parent directories and
    /// applying pending migrations.
    pub fn new(path: &Path) -> Result<Self, AherError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(storage_err("Failed to set busy timeout"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(storage_err("Failed to set pragmas"))?;

        info!(path = %path.display(), "Store opened");
        Self::migrated(conn)
    }

    pub fn in_memory() -> Result<Self, AherError> {
        let conn = Connection::open_in_memory().map_err(storage_err("Failed to open in-memory db"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err("Failed to set pragmas"))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, AherError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AherError> {
        self.conn
            .lock()
            .map_err(|e| AherError::Storage(format!("Database lock poisoned: {}", e)))
    }

    /// Run `f` with the connection held.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, AherError>
    where
        F: FnOnce(&Connection) -> Result<T, AherError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction, committed only if `f`
    /// succeeds. The write lock is taken up front so a read-then-write
    /// sequence cannot interleave with another process's writer.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, AherError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, AherError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(storage_err("Failed to begin transaction"))?;
        let value = f(&tx)?;
        tx.commit().map_err(storage_err("Failed to commit"))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_tiles(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))
                .map_err(|e| AherError::Storage(e.to_string()))
        })
        .unwrap()
    }

    fn pragma(db: &Database, name: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("PRAGMA {}", name), [], |row| row.get(0))
                .map_err(|e| AherError::Storage(e.to_string()))
        })
        .unwrap()
    }

    fn insert_tile(conn: &Connection) -> Result<usize, AherError> {
        conn.execute(
            "INSERT INTO tiles (tileid, resourceinstanceid) VALUES (?1, ?2)",
            rusqlite::params![uuid::Uuid::new_v4().to_string(), uuid::Uuid::new_v4().to_string()],
        )
        .map_err(|e| AherError::Storage(e.to_string()))
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_tiles(&db), 0);
        assert_eq!(pragma(&db, "foreign_keys"), 1);
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("aher.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(count_tiles(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_file_database_waits_on_locks() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("aher.db")).unwrap();
        assert_eq!(pragma(&db, "busy_timeout"), BUSY_TIMEOUT.as_millis() as i64);
    }

    #[test]
    fn test_second_process_sees_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aher.db");
        let indexer = Database::new(&path).unwrap();
        let server = Database::new(&path).unwrap();

        indexer.with_transaction(|tx| insert_tile(tx)).unwrap();
        assert_eq!(count_tiles(&server), 1);
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let db = Database::in_memory().unwrap();
        db.with_transaction(|tx| {
            insert_tile(tx)?;
            insert_tile(tx)
        })
        .unwrap();
        assert_eq!(count_tiles(&db), 2);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), AherError> = db.with_transaction(|tx| {
            insert_tile(tx)?;
            Err(AherError::Storage("embedding rejected".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(count_tiles(&db), 0);
    }
}
