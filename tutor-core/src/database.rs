//! Local database manager owning the single versioned SQLite database
//!
//! `DatabaseManager::open` hands out a shared `Database` handle, creating and
//! migrating the schema on first use. Every operation on the handle is a
//! transaction over exactly one table: same-table transactions serialize on that
//! table's lock, different tables never wait on each other's lock. The SQLite work
//! itself runs on the blocking pool so callers on the async thread only suspend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::migrations;

/// Tables declared by the current schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Conversations,
    Notes,
    Flashcards,
}

impl Table {
    pub fn all() -> &'static [Table] {
        &[Table::Conversations, Table::Notes, Table::Flashcards]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Conversations => "conversations",
            Self::Notes => "notes",
            Self::Flashcards => "flashcards",
        }
    }
}

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    File(PathBuf),
    /// Lives as long as the handle; reopening after `close` starts empty
    InMemory,
}

/// Opens the database once and hands out the shared handle
pub struct DatabaseManager {
    location: StorageLocation,
    handle: Mutex<Option<Database>>,
}

impl DatabaseManager {
    /// Manage a database file at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            location: StorageLocation::File(path.as_ref().to_path_buf()),
            handle: Mutex::new(None),
        }
    }

    /// Manage an in-memory database (useful for testing)
    pub fn in_memory() -> Self {
        Self {
            location: StorageLocation::InMemory,
            handle: Mutex::new(None),
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Open the database, reusing the live handle if there is one
    pub fn open(&self) -> Result<Database> {
        let mut handle = self.handle.lock();
        if let Some(db) = handle.as_ref().filter(|db| db.is_open()) {
            debug!("Reusing open database handle");
            return Ok(db.clone());
        }

        let db = Database::open_at(&self.location)?;
        *handle = Some(db.clone());
        Ok(db)
    }

    /// Close the managed handle; the next `open` reopens the database
    pub fn close(&self) {
        if let Some(db) = self.handle.lock().take() {
            db.close();
        }
    }
}

/// Shared handle to the open database
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Option<Connection>>,
    conversations: tokio::sync::Mutex<()>,
    notes: tokio::sync::Mutex<()>,
    flashcards: tokio::sync::Mutex<()>,
}

impl Inner {
    fn table_lock(&self, table: Table) -> &tokio::sync::Mutex<()> {
        match table {
            Table::Conversations => &self.conversations,
            Table::Notes => &self.notes,
            Table::Flashcards => &self.flashcards,
        }
    }
}

impl Database {
    fn open_at(location: &StorageLocation) -> Result<Self> {
        let mut conn = match location {
            StorageLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::StorageUnavailable(format!(
                            "cannot create {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Connection::open(path).map_err(|e| {
                    Error::StorageUnavailable(format!("cannot open {}: {e}", path.display()))
                })?
            }
            StorageLocation::InMemory => Connection::open_in_memory()
                .map_err(|e| Error::StorageUnavailable(format!("cannot open in-memory db: {e}")))?,
        };

        migrations::run_migrations(&mut conn)
            .map_err(|e| Error::StorageUnavailable(format!("schema setup failed: {e}")))?;

        info!("Database opened ({:?})", location);

        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(Some(conn)),
                conversations: tokio::sync::Mutex::new(()),
                notes: tokio::sync::Mutex::new(()),
                flashcards: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.conn.lock().is_some()
    }

    /// Whether two handles refer to the same open database
    pub fn same_handle(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Close the connection; later operations fail with `StorageUnavailable`
    pub fn close(&self) {
        if self.inner.conn.lock().take().is_some() {
            info!("Database closed");
        }
    }

    /// Schema version recorded in the open database
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.inner.conn.lock();
        let conn = conn.as_ref().ok_or_else(closed)?;
        Ok(migrations::schema_version(conn)?)
    }

    /// Run `f` inside one transaction scoped to `table`
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise, so a
    /// read-modify-write inside `f` is atomic with respect to other callers of the
    /// same table.
    pub async fn transact<T, F>(&self, table: Table, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let _table_guard = self.inner.table_lock(table).lock().await;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut conn = inner.conn.lock();
            let conn = conn.as_mut().ok_or_else(closed)?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| Error::StorageUnavailable(format!("{} worker failed: {e}", table.name())))?
    }
}

fn closed() -> Error {
    Error::StorageUnavailable("database is closed".to_string())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Read a millisecond timestamp column, failing on values chrono cannot represent
pub(crate) fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {millis} ms is out of range").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_reuses_handle() {
        let manager = DatabaseManager::in_memory();
        let first = manager.open().unwrap();
        let second = manager.open().unwrap();
        assert!(first.same_handle(&second));
        assert_eq!(first.schema_version().unwrap(), migrations::SCHEMA_VERSION);
    }

    #[test]
    fn test_close_then_open_reopens() {
        let manager = DatabaseManager::in_memory();
        let first = manager.open().unwrap();
        manager.close();
        assert!(!first.is_open());

        let second = manager.open().unwrap();
        assert!(!first.same_handle(&second));
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn test_closed_handle_is_unavailable() {
        let manager = DatabaseManager::in_memory();
        let db = manager.open().unwrap();
        db.close();

        let err = db
            .transact(Table::Notes, |tx| {
                Ok(tx.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get::<_, i64>(0))?)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_unusable_location_is_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // a regular file cannot be a parent directory
        let manager = DatabaseManager::new(file.path().join("tutor.db"));
        assert!(matches!(
            manager.open(),
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let db = DatabaseManager::in_memory().open().unwrap();

        let result: Result<()> = db
            .transact(Table::Notes, |tx| {
                tx.execute(
                    "INSERT INTO notes (text, category, created_at) VALUES ('hola', 'word', 0)",
                    [],
                )?;
                Err(Error::Validation("abort".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count = db
            .transact(Table::Notes, |tx| {
                Ok(tx.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get::<_, i64>(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_constraint_violation_aborts_transaction() {
        let db = DatabaseManager::in_memory().open().unwrap();

        let err = db
            .transact(Table::Notes, |tx| {
                tx.execute(
                    "INSERT INTO notes (text, category, created_at) VALUES ('x', 'bogus', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionAborted(_)));
    }

    #[test]
    fn test_millis_column() {
        let conn = Connection::open_in_memory().unwrap();
        let read = |millis: i64| {
            conn.query_row("SELECT ?1", [millis], |row| millis_column(row, 0))
        };

        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(read(to_millis(at)).unwrap(), at);
        assert_eq!(read(0).unwrap(), DateTime::<Utc>::UNIX_EPOCH);
        assert!(matches!(
            read(i64::MAX),
            Err(rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, _))
        ));
    }
}
