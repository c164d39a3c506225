//! Durable operation queue.
//!
//! Pending write intents survive process restarts. Each operation gets a
//! queue-assigned ID and a strictly increasing enqueue timestamp; `get_all`
//! returns them in timestamp order. Operations dropped as non-retryable are
//! moved to a separate ledger until the user dismisses them.

use crate::{lock, SharedConnection, StorageError, StorageResult};
use recordsync_types::{
    CanonicalId, FailedOperation, LocalId, OperationId, OperationKind, OperationPayload,
    QueueOperation, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub(crate) fn init_schema(conn: &SharedConnection) -> StorageResult<()> {
    let conn = lock(conn)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            wall_time INTEGER NOT NULL,
            logical INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS operations_order
            ON operations (wall_time, logical, id);

        CREATE TABLE IF NOT EXISTS failed_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            error TEXT NOT NULL,
            failed_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Ordered, persistent log of pending write intents.
pub struct OperationQueue {
    conn: SharedConnection,
    /// Last timestamp handed out, so enqueue order survives clock steps.
    last_issued: Mutex<Option<Timestamp>>,
}

impl OperationQueue {
    /// Opens (or creates) a standalone queue at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens an in-memory queue (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let conn = Arc::new(Mutex::new(conn));
        init_schema(&conn)?;
        Self::from_shared(conn)
    }

    pub(crate) fn from_shared(conn: SharedConnection) -> StorageResult<Self> {
        Ok(Self {
            conn,
            last_issued: Mutex::new(None),
        })
    }

    /// Appends an operation with zero attempts.
    pub fn enqueue(&self, payload: OperationPayload) -> StorageResult<QueueOperation> {
        let conn = lock(&self.conn)?;
        let mut last_issued = self
            .last_issued
            .lock()
            .map_err(|_| StorageError::InvalidData("queue clock lock poisoned".into()))?;

        let stored_max: Option<(i64, i64)> = conn
            .query_row(
                "SELECT wall_time, logical FROM operations
                 ORDER BY wall_time DESC, logical DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let floor = stored_max
            .map(|(w, l)| Timestamp::new(w as u64, l as u32))
            .max(*last_issued);
        let enqueued_at = match floor {
            Some(prev) => prev.tick().max(Timestamp::now()),
            None => Timestamp::now(),
        };

        let kind = payload.kind();
        conn.execute(
            "INSERT INTO operations (kind, payload, wall_time, logical, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                kind.as_str(),
                serde_json::to_string(&payload)?,
                enqueued_at.wall_time() as i64,
                enqueued_at.logical() as i64,
            ],
        )?;
        let id = OperationId::new(conn.last_insert_rowid());
        *last_issued = Some(enqueued_at);
        debug!("Enqueued {} operation {}", kind, id);

        Ok(QueueOperation {
            id,
            payload,
            enqueued_at,
            attempts: 0,
        })
    }

    /// Returns all pending operations, oldest first.
    pub fn get_all(&self) -> StorageResult<Vec<QueueOperation>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, wall_time, logical, attempts FROM operations
             ORDER BY wall_time, logical, id",
        )?;
        let rows = stmt.query_map([], read_operation_row)?;

        let mut ops = Vec::new();
        for row in rows {
            ops.push(decode_operation(row?)?);
        }
        Ok(ops)
    }

    /// Removes one operation. Removing an absent ID is not an error.
    pub fn dequeue(&self, id: OperationId) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM operations WHERE id = ?1", params![id.as_i64()])?;
        Ok(())
    }

    /// Bumps the attempt counter of one operation.
    pub fn increment_attempts(&self, id: OperationId) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE operations SET attempts = attempts + 1 WHERE id = ?1",
            params![id.as_i64()],
        )?;
        Ok(())
    }

    /// Returns whether an operation is still pending.
    pub fn contains(&self, id: OperationId) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM operations WHERE id = ?1",
                params![id.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of pending operations.
    pub fn len(&self) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops pending creates for a record that was deleted before it ever
    /// reached the remote authority. Returns how many were removed.
    pub fn remove_creates_for(&self, local_id: LocalId) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT id, payload FROM operations WHERE kind = ?1")?;
        let rows = stmt.query_map(params![OperationKind::Create.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut doomed = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            if let OperationPayload::Create { local_id: queued, .. } =
                serde_json::from_str::<OperationPayload>(&payload)?
            {
                if queued == local_id {
                    doomed.push(id);
                }
            }
        }
        drop(stmt);

        for id in &doomed {
            conn.execute("DELETE FROM operations WHERE id = ?1", params![id])?;
        }
        Ok(doomed.len())
    }

    /// Returns whether an update or delete for `id` is still pending.
    pub fn has_pending_for(&self, id: &CanonicalId) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT payload FROM operations WHERE kind != ?1")?;
        let rows = stmt.query_map(params![OperationKind::Create.as_str()], |row| {
            row.get::<_, String>(0)
        })?;

        for row in rows {
            match serde_json::from_str::<OperationPayload>(&row?)? {
                OperationPayload::Update { id: queued, .. }
                | OperationPayload::Delete { id: queued } => {
                    if &queued == id {
                        return Ok(true);
                    }
                }
                OperationPayload::Create { .. } => {}
            }
        }
        Ok(false)
    }

    /// Empties the queue. Only for explicit resets.
    pub fn clear(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM operations", [])?;
        Ok(())
    }

    // ── Failure ledger ───────────────────────────────────────────

    /// Records an operation dropped as non-retryable.
    pub fn record_failure(
        &self,
        operation: &QueueOperation,
        error: &str,
    ) -> StorageResult<FailedOperation> {
        let conn = lock(&self.conn)?;
        let failed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        conn.execute(
            "INSERT INTO failed_operations (operation, error, failed_at) VALUES (?1, ?2, ?3)",
            params![serde_json::to_string(operation)?, error, failed_at as i64],
        )?;
        Ok(FailedOperation {
            id: conn.last_insert_rowid(),
            operation: operation.clone(),
            error: error.to_string(),
            failed_at,
        })
    }

    /// Lists undismissed failure notices, oldest first.
    pub fn failures(&self) -> StorageResult<Vec<FailedOperation>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT id, operation, error, failed_at FROM failed_operations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, operation, error, failed_at) = row?;
            result.push(FailedOperation {
                id,
                operation: serde_json::from_str(&operation)?,
                error,
                failed_at: failed_at as u64,
            });
        }
        Ok(result)
    }

    /// Dismisses a failure notice. Returns whether it existed.
    pub fn dismiss_failure(&self, id: i64) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let n = conn.execute("DELETE FROM failed_operations WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }
}

type OperationRow = (i64, String, String, i64, i64, i64);

fn read_operation_row(row: &Row<'_>) -> rusqlite::Result<OperationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_operation(row: OperationRow) -> StorageResult<QueueOperation> {
    let (id, kind, payload, wall_time, logical, attempts) = row;
    let kind = OperationKind::from_str(&kind)
        .map_err(|e| StorageError::InvalidData(format!("operation {id}: {e}")))?;
    let payload: OperationPayload = serde_json::from_str(&payload)?;
    if payload.kind() != kind {
        return Err(StorageError::InvalidData(format!(
            "operation {id}: kind column {kind} does not match payload {}",
            payload.kind()
        )));
    }
    Ok(QueueOperation {
        id: OperationId::new(id),
        payload,
        enqueued_at: Timestamp::new(wall_time as u64, logical as u32),
        attempts: attempts as u32,
    })
}
