//! Database connection pool manager.
//!
//! Manages the SQLite connection pool with WAL mode enabled for
//! multi-reader / single-writer concurrency. Foreign keys are enforced on
//! every connection via the connect options.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::errors::DatabaseError;
use super::schema;

/// Database handle owning the connection pool.
///
/// # Configuration
/// - Journal mode: WAL (readers never block behind the writer)
/// - Synchronous: NORMAL
/// - Foreign keys: enabled per connection
/// - Busy timeout: 5 seconds
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `database_url` and bring
    /// the schema up to date.
    ///
    /// `database_url` is a SQLite URL, e.g. `sqlite:.abathur/abathur.db`
    /// or `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        Self::connect_with_max_connections(database_url, 10).await
    }

    /// Open with an explicit pool cap.
    ///
    /// In-memory databases are forced to a single connection: each SQLite
    /// `:memory:` connection is an independent database.
    pub async fn connect_with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::Connection(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(format!("failed to create pool: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run the idempotent schema bring-up. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        schema::initialize(&self.pool).await?;
        info!("database schema up to date");
        Ok(())
    }

    /// Connection pool for repository implementations.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `PRAGMA integrity_check`; true iff the store reports "ok".
    pub async fn integrity_check(&self) -> Result<bool, DatabaseError> {
        let row = sqlx::query("PRAGMA integrity_check")
            .fetch_one(&self.pool)
            .await?;
        let result: String = row.try_get(0).map_err(DatabaseError::from)?;
        Ok(result == "ok")
    }

    /// Run `PRAGMA foreign_key_check`, returning a description of each
    /// violating row (empty = clean).
    pub async fn validate_foreign_keys(&self) -> Result<Vec<String>, DatabaseError> {
        let rows = sqlx::query("PRAGMA foreign_key_check")
            .fetch_all(&self.pool)
            .await?;

        let mut violations = Vec::new();
        for row in rows {
            let table: String = row.try_get(0).map_err(DatabaseError::from)?;
            let rowid: Option<i64> = row.try_get(1).ok();
            let parent: String = row.try_get(2).map_err(DatabaseError::from)?;
            violations.push(format!(
                "table {table} rowid {rowid:?} references missing {parent}"
            ));
        }
        Ok(violations)
    }

    /// Return the `EXPLAIN QUERY PLAN` detail lines for a query.
    ///
    /// Used by tests to confirm critical queries hit their intended index.
    pub async fn explain_query_plan(&self, sql: &str) -> Result<Vec<String>, DatabaseError> {
        let explain_sql = format!("EXPLAIN QUERY PLAN {sql}");
        let rows = sqlx::query(&explain_sql).fetch_all(&self.pool).await?;

        let mut details = Vec::new();
        for row in rows {
            let detail: String = row.try_get("detail").map_err(DatabaseError::from)?;
            details.push(detail);
        }
        Ok(details)
    }

    /// Current database size in bytes (`page_count * page_size`).
    pub async fn database_size_bytes(&self) -> Result<u64, DatabaseError> {
        let page_count: i64 = sqlx::query("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)
            .map_err(DatabaseError::from)?;
        let page_size: i64 = sqlx::query("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)
            .map_err(DatabaseError::from)?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    /// Run VACUUM and return the number of bytes reclaimed.
    pub async fn vacuum(&self) -> Result<u64, DatabaseError> {
        let before = self.database_size_bytes().await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        let after = self.database_size_bytes().await?;
        Ok(before.saturating_sub(after))
    }

    /// Total number of rows in the tasks table.
    pub async fn count_all_tasks(&self) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        row.try_get(0).map_err(DatabaseError::from)
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
