//! Database schema for the log buffer.

use duckdb::Connection;

use crate::store::StoreError;

/// SQL for the log buffer table.
///
/// `id` preserves insertion order within a group; `batch_id` is the claim
/// marker (NULL = pending, non-NULL = part of an in-flight batch).
pub const LOGS_TABLE_DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS logs_id_seq;
CREATE TABLE IF NOT EXISTS logs (
    id          BIGINT      PRIMARY KEY DEFAULT NEXTVAL('logs_id_seq'),
    group_name  VARCHAR     NOT NULL,
    payload     VARCHAR     NOT NULL,
    batch_id    VARCHAR
);
CREATE INDEX IF NOT EXISTS idx_logs_group ON logs (group_name);
"#;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(LOGS_TABLE_DDL)?;
    tracing::debug!("Log store schema initialized");
    Ok(())
}
