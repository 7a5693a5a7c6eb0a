//! Embedded log buffer with batch-claim semantics.

use std::path::Path;

use duckdb::Connection;
use uuid::Uuid;

use crate::model::{LogRecord, LogSerializer};
use crate::store::StoreError;
use crate::store::schema::init_schema;

/// A slice of persisted logs claimed for transmission.
#[derive(Debug)]
pub struct ClaimedBatch {
    /// Unique claim id; never reused.
    pub batch_id: Uuid,
    /// Claimed records in insertion order.
    pub logs: Vec<LogRecord>,
}

/// Durable store for serialized log records, keyed by group.
///
/// Rows move through three states: pending (`batch_id IS NULL`), claimed
/// (`batch_id` set by [`get_logs`](Self::get_logs)), and deleted. Claims
/// are released wholesale by [`clear_pending_state`](Self::clear_pending_state),
/// which also runs implicitly at open so that rows claimed by a dead
/// process become eligible again.
///
/// Not thread safe; owned and driven exclusively by the store worker.
pub struct LogStore {
    conn: Connection,
    serializer: Box<dyn LogSerializer>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore").finish_non_exhaustive()
    }
}

impl LogStore {
    /// Open (or create) the store at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        serializer: Box<dyn LogSerializer>,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn, serializer)
    }

    /// Open an in-memory store. Contents do not survive the process.
    pub fn open_in_memory(serializer: Box<dyn LogSerializer>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, serializer)
    }

    fn init(conn: Connection, serializer: Box<dyn LogSerializer>) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        let store = Self { conn, serializer };
        // Claims held by a previous process are stale by definition.
        let released = store.clear_pending_state()?;
        if released > 0 {
            tracing::info!(released, "Released stale batch claims from previous process");
        }
        Ok(store)
    }

    /// Serialize and persist one record under `group`.
    pub fn put(&self, group: &str, log: &LogRecord) -> Result<(), StoreError> {
        let payload = self.serializer.serialize(log)?;
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO logs (group_name, payload) VALUES (?, ?)")?;
        stmt.execute(duckdb::params![group, payload])?;
        Ok(())
    }

    /// Number of persisted records for `group` not claimed by any batch.
    pub fn count(&self, group: &str) -> Result<i64, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM logs WHERE group_name = ? AND batch_id IS NULL")?;
        let count = stmt.query_row(duckdb::params![group], |row| row.get(0))?;
        Ok(count)
    }

    /// Claim up to `limit` oldest pending records of `group` under a fresh
    /// batch id.
    ///
    /// Returns `None` when no pending records exist. Rows whose payload no
    /// longer deserializes are deleted and skipped; they never surface to
    /// the caller.
    pub fn get_logs(
        &mut self,
        group: &str,
        limit: usize,
    ) -> Result<Option<ClaimedBatch>, StoreError> {
        let tx = self.conn.transaction()?;

        let mut selected: Vec<(i64, String)> = Vec::new();
        {
            let mut stmt = tx.prepare_cached(
                "SELECT id, payload FROM logs \
                 WHERE group_name = ? AND batch_id IS NULL \
                 ORDER BY id LIMIT ?",
            )?;
            let rows = stmt.query_map(duckdb::params![group, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                selected.push(row?);
            }
        }
        if selected.is_empty() {
            return Ok(None);
        }

        let mut claimed: Vec<i64> = Vec::with_capacity(selected.len());
        let mut corrupt: Vec<i64> = Vec::new();
        let mut logs = Vec::with_capacity(selected.len());
        for (id, payload) in &selected {
            match self.serializer.deserialize(payload) {
                Ok(log) => {
                    claimed.push(*id);
                    logs.push(log);
                }
                Err(e) => {
                    tracing::warn!(group = %group, id, error = %e, "Dropping undecodable log row");
                    corrupt.push(*id);
                }
            }
        }

        if !corrupt.is_empty() {
            tx.execute(
                &format!("DELETE FROM logs WHERE id IN ({})", join_ids(&corrupt)),
                [],
            )?;
        }
        if claimed.is_empty() {
            tx.commit()?;
            return Ok(None);
        }

        let batch_id = Uuid::new_v4();
        tx.execute(
            &format!(
                "UPDATE logs SET batch_id = ? WHERE id IN ({})",
                join_ids(&claimed)
            ),
            duckdb::params![batch_id.to_string()],
        )?;
        tx.commit()?;

        tracing::debug!(group = %group, batch_id = %batch_id, count = logs.len(), "Claimed batch");
        Ok(Some(ClaimedBatch { batch_id, logs }))
    }

    /// Permanently remove the rows claimed under `batch_id`.
    pub fn delete_batch(&self, group: &str, batch_id: Uuid) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM logs WHERE group_name = ? AND batch_id = ?")?;
        let deleted = stmt.execute(duckdb::params![group, batch_id.to_string()])?;
        tracing::debug!(group = %group, batch_id = %batch_id, deleted, "Deleted batch rows");
        Ok(())
    }

    /// Permanently remove every row of `group`.
    pub fn delete_all(&self, group: &str) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM logs WHERE group_name = ?")?;
        let deleted = stmt.execute(duckdb::params![group])?;
        tracing::debug!(group = %group, deleted, "Deleted all group rows");
        Ok(())
    }

    /// Release every open batch claim, leaving row data untouched.
    ///
    /// Returns the number of rows whose claim was released.
    pub fn clear_pending_state(&self) -> Result<usize, StoreError> {
        let released = self
            .conn
            .execute("UPDATE logs SET batch_id = NULL WHERE batch_id IS NOT NULL", [])?;
        Ok(released)
    }

    /// Insert a raw payload row, bypassing the serializer.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, group: &str, payload: &str) {
        self.conn
            .execute(
                "INSERT INTO logs (group_name, payload) VALUES (?, ?)",
                duckdb::params![group, payload],
            )
            .unwrap();
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
