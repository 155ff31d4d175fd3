//! Read/append access to the audit trail.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::models::AuditEntry;
use crate::infrastructure::database::errors::DatabaseError;
use crate::infrastructure::database::utils::parse_datetime;

pub struct AuditRepo {
    pool: SqlitePool,
}

impl AuditRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry, DatabaseError> {
        let operation: Option<String> = row
            .try_get("memory_operation_type")
            .map_err(DatabaseError::from)?;
        let action_data: String = row.try_get("action_data").map_err(DatabaseError::from)?;

        Ok(AuditEntry {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            timestamp: parse_datetime(
                &row.try_get::<String, _>("timestamp")
                    .map_err(DatabaseError::from)?,
            )?,
            task_id: row.try_get("task_id").map_err(DatabaseError::from)?,
            action_type: row.try_get("action_type").map_err(DatabaseError::from)?,
            memory_operation_type: operation
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            memory_namespace: row
                .try_get("memory_namespace")
                .map_err(DatabaseError::from)?,
            memory_entry_id: row
                .try_get("memory_entry_id")
                .map_err(DatabaseError::from)?,
            action_data: serde_json::from_str(&action_data)
                .map_err(|e| DatabaseError::Corrupted(format!("bad action_data json: {e}")))?,
        })
    }

    /// Append one audit row outside any caller transaction.
    pub async fn append(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO audit (
                timestamp, task_id, action_type, memory_operation_type,
                memory_namespace, memory_entry_id, action_data
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.task_id)
        .bind(&entry.action_type)
        .bind(entry.memory_operation_type.map(|op| op.as_str()))
        .bind(&entry.memory_namespace)
        .bind(entry.memory_entry_id)
        .bind(entry.action_data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows referencing a task, oldest first. Survives task deletion.
    pub async fn list_for_task(&self, task_id: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM audit WHERE task_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Memory-operation rows under a namespace prefix, oldest first.
    pub async fn list_memory_operations(
        &self,
        namespace_prefix: &str,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM audit
             WHERE memory_operation_type IS NOT NULL AND memory_namespace LIKE ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(format!("{namespace_prefix}%"))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}
