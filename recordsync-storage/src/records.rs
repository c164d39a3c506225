//! Durable record table.
//!
//! Rows are keyed by the record's single active key and ordered by an
//! insertion sequence, which gives `load_all` a stable order. Replacing a
//! record in place (upsert, remap) keeps its sequence number.

use crate::{lock, SharedConnection, StorageError, StorageResult};
use recordsync_types::{Fields, Record, RecordId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub(crate) fn init_schema(conn: &SharedConnection) -> StorageResult<()> {
    let conn = lock(conn)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Persistent record set backed by SQLite.
#[derive(Clone)]
pub struct RecordStore {
    conn: SharedConnection,
}

impl RecordStore {
    /// Opens (or creates) a standalone record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory record store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(conn));
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn from_shared(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Loads every record in insertion order.
    pub fn load_all(&self) -> StorageResult<Vec<Record>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT key, data FROM records ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (key, data) = row?;
            records.push(decode(&key, &data)?);
        }
        Ok(records)
    }

    /// Loads one record by key.
    pub fn get(&self, id: &RecordId) -> StorageResult<Option<Record>> {
        let conn = lock(&self.conn)?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE key = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| decode(&id.to_string(), &d)).transpose()
    }

    /// Inserts or replaces a record by key.
    pub fn put(&self, record: &Record) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        put_row(&conn, record)
    }

    /// Deletes a record. Returns whether a row existed.
    pub fn delete(&self, id: &RecordId) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let n = conn.execute("DELETE FROM records WHERE key = ?1", params![id.to_string()])?;
        Ok(n > 0)
    }

    /// Moves a record from `old` to `new` in one transaction, keeping its
    /// fields and position. Any row already stored under `new` is replaced.
    ///
    /// Returns the remapped record, or `None` if nothing was stored under `old`.
    pub fn remap(&self, old: &RecordId, new: &RecordId) -> StorageResult<Option<Record>> {
        if old == new {
            return self.get(old);
        }
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM records WHERE key = ?1",
                params![old.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Ok(None);
        };

        let displaced = tx.execute(
            "DELETE FROM records WHERE key = ?1",
            params![new.to_string()],
        )?;
        if displaced > 0 {
            debug!("Remap {} -> {} replaced an existing row", old, new);
        }
        tx.execute(
            "UPDATE records SET key = ?1 WHERE key = ?2",
            params![new.to_string(), old.to_string()],
        )?;
        tx.commit()?;

        decode(&new.to_string(), &data).map(Some)
    }

    /// Removes every record.
    pub fn clear(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM records", [])?;
        Ok(())
    }

    /// Replaces the whole record set in one transaction.
    pub fn replace_all(&self, records: &[Record]) -> StorageResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        for record in records {
            put_row(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns the number of stored records.
    pub fn count(&self) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn put_row(conn: &Connection, record: &Record) -> StorageResult<()> {
    let data = serde_json::to_string(&record.fields)?;
    conn.execute(
        "INSERT INTO records (key, data) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET data = excluded.data",
        params![record.id.to_string(), data],
    )?;
    Ok(())
}

fn decode(key: &str, data: &str) -> StorageResult<Record> {
    let fields: Fields = serde_json::from_str(data)
        .map_err(|e| StorageError::InvalidData(format!("record {key}: {e}")))?;
    Ok(Record {
        id: RecordId::parse(key),
        fields,
    })
}
