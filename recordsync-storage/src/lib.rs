//! SQLite storage layer for recordsync.
//!
//! Provides the durable halves of the local-first engine:
//!
//! - [`RecordStore`]: the persisted record set, one row per active key
//! - [`OperationQueue`]: ordered pending write intents with attempt counters,
//!   plus a ledger of operations dropped as non-retryable
//!
//! Both live in the same database file and share one connection when opened
//! through [`Database`]. All calls are blocking; async callers are expected
//! to hop onto a blocking thread.

mod error;
mod queue;
mod records;

pub use error::{StorageError, StorageResult};
pub use queue::OperationQueue;
pub use records::RecordStore;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::InvalidData("connection lock poisoned".into()))
}

/// One SQLite database holding both the record table and the queue.
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Opens (or creates) a database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(conn));
        records::init_schema(&conn)?;
        queue::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Returns a record store backed by this database.
    pub fn records(&self) -> RecordStore {
        RecordStore::from_shared(self.conn.clone())
    }

    /// Returns an operation queue backed by this database.
    pub fn queue(&self) -> StorageResult<OperationQueue> {
        OperationQueue::from_shared(self.conn.clone())
    }
}
