//! SQLite repository for versioned memory entries.
//!
//! Every mutation commits the memory row and its audit row in the same
//! transaction: either both land or neither does.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{MemoryEntry, MemoryType};
use crate::infrastructure::database::errors::DatabaseError;
use crate::infrastructure::database::utils::parse_datetime;

pub struct MemoryRepo {
    pool: SqlitePool,
}

impl MemoryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> Result<MemoryEntry, DatabaseError> {
        let memory_type: String = row.try_get("memory_type").map_err(DatabaseError::from)?;
        let value_json: String = row.try_get("value").map_err(DatabaseError::from)?;
        let metadata_json: String = row.try_get("metadata").map_err(DatabaseError::from)?;

        Ok(MemoryEntry {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            namespace: row.try_get("namespace").map_err(DatabaseError::from)?,
            key: row.try_get("key").map_err(DatabaseError::from)?,
            value: serde_json::from_str(&value_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad value json: {e}")))?,
            memory_type: memory_type
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            version: row.try_get("version").map_err(DatabaseError::from)?,
            metadata: serde_json::from_str(&metadata_json)
                .map_err(|e| DatabaseError::Corrupted(format!("bad metadata json: {e}")))?,
            is_deleted: row.try_get::<i64, _>("is_deleted").map_err(DatabaseError::from)? != 0,
            created_by: row.try_get("created_by").map_err(DatabaseError::from)?,
            updated_by: row.try_get("updated_by").map_err(DatabaseError::from)?,
            created_at: parse_datetime(
                &row.try_get::<String, _>("created_at")
                    .map_err(DatabaseError::from)?,
            )?,
            updated_at: parse_datetime(
                &row.try_get::<String, _>("updated_at")
                    .map_err(DatabaseError::from)?,
            )?,
        })
    }

    /// Insert version 1 of a memory entry plus its audit row.
    pub async fn insert(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        memory_type: MemoryType,
        created_by: &str,
        task_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let value_json = serde_json::to_string(value)
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable value: {e}")))?;
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable metadata: {e}")))?
            .unwrap_or_else(|| "{}".to_string());

        let memory_id: i64 = sqlx::query(
            r"
            INSERT INTO memory_entries (
                namespace, key, value, memory_type, version, metadata,
                created_by, updated_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(namespace)
        .bind(key)
        .bind(value_json)
        .bind(memory_type.as_str())
        .bind(metadata_json)
        .bind(created_by)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)
        .map_err(DatabaseError::from)?;

        sqlx::query(
            r"
            INSERT INTO audit (
                timestamp, task_id, action_type, memory_operation_type,
                memory_namespace, memory_entry_id, action_data
            )
            VALUES (?, ?, 'memory_create', 'create', ?, ?, ?)
            ",
        )
        .bind(&now)
        .bind(task_id)
        .bind(namespace)
        .bind(memory_id)
        .bind(
            serde_json::json!({"key": key, "memory_type": memory_type.as_str()}).to_string(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(memory_id)
    }

    /// Latest non-deleted version, or a specific version when given.
    pub async fn get(
        &self,
        namespace: &str,
        key: &str,
        version: Option<i64>,
    ) -> Result<Option<MemoryEntry>, DatabaseError> {
        let row = match version {
            None => {
                sqlx::query(
                    "SELECT * FROM memory_entries
                     WHERE namespace = ? AND key = ? AND is_deleted = 0
                     ORDER BY version DESC LIMIT 1",
                )
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(
                    "SELECT * FROM memory_entries
                     WHERE namespace = ? AND key = ? AND version = ?",
                )
                .bind(namespace)
                .bind(key)
                .bind(version)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Insert a new version (max active version + 1) plus its audit row.
    ///
    /// Versions within a (namespace, key) are strictly monotonic: the new
    /// version number is computed and the row inserted inside one
    /// transaction.
    pub async fn insert_new_version(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        updated_by: &str,
        task_id: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT MAX(version) AS current_version, memory_type, created_by, created_at
             FROM memory_entries
             WHERE namespace = ? AND key = ? AND is_deleted = 0",
        )
        .bind(namespace)
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;

        let current_version: Option<i64> =
            row.try_get("current_version").map_err(DatabaseError::from)?;
        let Some(current_version) = current_version else {
            return Err(DatabaseError::NotFound(format!(
                "memory {namespace}:{key}"
            )));
        };
        let memory_type: String = row.try_get("memory_type").map_err(DatabaseError::from)?;
        let created_by: String = row.try_get("created_by").map_err(DatabaseError::from)?;
        let created_at: String = row.try_get("created_at").map_err(DatabaseError::from)?;

        let new_version = current_version + 1;
        let value_json = serde_json::to_string(value)
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable value: {e}")))?;

        let memory_id: i64 = sqlx::query(
            r"
            INSERT INTO memory_entries (
                namespace, key, value, memory_type, version, metadata,
                created_by, updated_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, '{}', ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(namespace)
        .bind(key)
        .bind(value_json)
        .bind(&memory_type)
        .bind(new_version)
        .bind(&created_by)
        .bind(updated_by)
        .bind(&created_at)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)
        .map_err(DatabaseError::from)?;

        sqlx::query(
            r"
            INSERT INTO audit (
                timestamp, task_id, action_type, memory_operation_type,
                memory_namespace, memory_entry_id, action_data
            )
            VALUES (?, ?, 'memory_update', 'update', ?, ?, ?)
            ",
        )
        .bind(&now)
        .bind(task_id)
        .bind(namespace)
        .bind(memory_id)
        .bind(serde_json::json!({"key": key, "version": new_version}).to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(memory_id)
    }

    /// Soft-delete every active version of (namespace, key) plus the
    /// audit row. Returns false when nothing was active.
    pub async fn soft_delete(
        &self,
        namespace: &str,
        key: &str,
        task_id: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let affected = sqlx::query(
            "UPDATE memory_entries SET is_deleted = 1, updated_at = ?
             WHERE namespace = ? AND key = ? AND is_deleted = 0",
        )
        .bind(&now)
        .bind(namespace)
        .bind(key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected > 0 {
            sqlx::query(
                r"
                INSERT INTO audit (
                    timestamp, task_id, action_type, memory_operation_type,
                    memory_namespace, action_data
                )
                VALUES (?, ?, 'memory_delete', 'delete', ?, ?)
                ",
            )
            .bind(&now)
            .bind(task_id)
            .bind(namespace)
            .bind(serde_json::json!({"key": key}).to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Prefix search over namespaces, newest-updated first.
    pub async fn search(
        &self,
        namespace_prefix: &str,
        memory_type: Option<MemoryType>,
        limit: u32,
    ) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let pattern = format!("{namespace_prefix}%");
        let rows = match memory_type {
            Some(mt) => {
                sqlx::query(
                    "SELECT * FROM memory_entries
                     WHERE namespace LIKE ? AND memory_type = ? AND is_deleted = 0
                     ORDER BY updated_at DESC LIMIT ?",
                )
                .bind(&pattern)
                .bind(mt.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM memory_entries
                     WHERE namespace LIKE ? AND is_deleted = 0
                     ORDER BY updated_at DESC LIMIT ?",
                )
                .bind(&pattern)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// All distinct active namespaces.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT DISTINCT namespace FROM memory_entries
             WHERE is_deleted = 0 ORDER BY namespace",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("namespace").map_err(DatabaseError::from))
            .collect()
    }

    /// Every version of (namespace, key), deleted included, newest first.
    pub async fn history(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM memory_entries
             WHERE namespace = ? AND key = ? ORDER BY version DESC",
        )
        .bind(namespace)
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Soft-delete active entries under a namespace prefix, optionally
    /// restricted by type and age.
    pub async fn soft_delete_matching(
        &self,
        namespace_prefix: &str,
        memory_type: Option<MemoryType>,
        older_than_days: Option<u32>,
    ) -> Result<u64, DatabaseError> {
        let mut sql = String::from(
            "UPDATE memory_entries SET is_deleted = 1, updated_at = ?
             WHERE namespace LIKE ? AND is_deleted = 0",
        );
        if memory_type.is_some() {
            sql.push_str(" AND memory_type = ?");
        }
        if older_than_days.is_some() {
            // Age threshold binds as REAL: a text bind would never compare
            // greater than julianday's REAL result
            sql.push_str(" AND (julianday('now') - julianday(created_at)) > ?");
        }

        let mut query = sqlx::query(&sql)
            .bind(Utc::now().to_rfc3339())
            .bind(format!("{namespace_prefix}%"));
        if let Some(mt) = memory_type {
            query = query.bind(mt.as_str());
        }
        if let Some(days) = older_than_days {
            query = query.bind(f64::from(days));
        }

        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Soft-delete episodic memories older than the TTL.
    pub async fn cleanup_expired(&self, ttl_days: u32) -> Result<u64, DatabaseError> {
        let affected = sqlx::query(
            "UPDATE memory_entries SET is_deleted = 1, updated_at = ?
             WHERE memory_type = 'episodic'
               AND is_deleted = 0
               AND (julianday('now') - julianday(created_at)) > ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(f64::from(ttl_days))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }
}
