//! Schema bring-up and idempotent migrations.
//!
//! Everything here is safe to run repeatedly: tables and indexes use
//! `IF NOT EXISTS`, and late-added columns go through
//! [`add_column_if_missing`], which probes `PRAGMA table_info` first.
//! Running the migration twice must produce an identical schema with no
//! errors.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::errors::DatabaseError;

/// Table DDL, ordered so foreign-key targets exist before their referers.
const CREATE_TABLES: &[&str] = &[
    // Session management and event tracking
    r"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        app_name TEXT NOT NULL,
        user_id TEXT NOT NULL,
        project_id TEXT,
        status TEXT NOT NULL DEFAULT 'created'
            CHECK (status IN ('created','active','paused','terminated','archived')),
        events TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(events)),
        state TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(state)),
        metadata TEXT CHECK (metadata IS NULL OR json_valid(metadata)),
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        last_update_time TEXT NOT NULL DEFAULT (datetime('now')),
        terminated_at TEXT
    )",
    // Task definitions and execution state
    r"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        prompt TEXT NOT NULL,
        summary TEXT,
        agent_type TEXT NOT NULL DEFAULT 'requirements-gatherer',
        priority INTEGER NOT NULL DEFAULT 5 CHECK (priority BETWEEN 0 AND 10),
        calculated_priority REAL NOT NULL DEFAULT 0.0,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending','blocked','ready','running','completed','failed','cancelled')),
        source TEXT NOT NULL DEFAULT 'human'
            CHECK (source IN ('human','agent_requirements','agent_planner','agent_implementation')),
        dependency_type TEXT NOT NULL DEFAULT 'sequential'
            CHECK (dependency_type IN ('sequential','parallel')),
        dependency_depth INTEGER NOT NULL DEFAULT 0,
        input_data TEXT CHECK (input_data IS NULL OR json_valid(input_data)),
        result_data TEXT CHECK (result_data IS NULL OR json_valid(result_data)),
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        max_execution_timeout_seconds INTEGER NOT NULL DEFAULT 3600,
        estimated_duration_seconds INTEGER,
        deadline TEXT,
        submitted_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        last_updated_at TEXT NOT NULL,
        parent_task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
        session_id TEXT REFERENCES sessions(id) ON DELETE SET NULL,
        feature_branch TEXT,
        task_branch TEXT,
        worktree_path TEXT,
        created_by TEXT
    )",
    // Directed dependency edges: dependent needs prerequisite done
    r"
    CREATE TABLE IF NOT EXISTS task_dependencies (
        id TEXT PRIMARY KEY,
        dependent_task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        prerequisite_task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        dependency_type TEXT NOT NULL DEFAULT 'sequential'
            CHECK (dependency_type IN ('sequential','parallel')),
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        resolved_at TEXT,
        UNIQUE (dependent_task_id, prerequisite_task_id),
        CHECK (dependent_task_id <> prerequisite_task_id)
    )",
    // Long-term persistent memory (versioned, soft-deleted)
    r"
    CREATE TABLE IF NOT EXISTS memory_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL CHECK (json_valid(value)),
        memory_type TEXT NOT NULL
            CHECK (memory_type IN ('semantic','episodic','procedural')),
        version INTEGER NOT NULL DEFAULT 1,
        metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata)),
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_by TEXT NOT NULL DEFAULT '',
        updated_by TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (namespace, key, version)
    )",
    // Markdown document indexing
    r"
    CREATE TABLE IF NOT EXISTS document_index (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        title TEXT,
        summary TEXT,
        content_hash TEXT,
        indexed_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    // Agent lifecycle tracking (rows die with their task)
    r"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        specialization TEXT NOT NULL DEFAULT '',
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        state TEXT NOT NULL DEFAULT 'spawning'
            CHECK (state IN ('spawning','idle','busy','terminating','terminated')),
        model TEXT NOT NULL DEFAULT '',
        spawned_at TEXT NOT NULL DEFAULT (datetime('now')),
        terminated_at TEXT,
        resource_usage TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(resource_usage))
    )",
    // Legacy task state (deprecated, retained for older databases)
    r"
    CREATE TABLE IF NOT EXISTS state (
        task_id TEXT PRIMARY KEY,
        state_data TEXT CHECK (state_data IS NULL OR json_valid(state_data)),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    // Append-only audit log. task_id deliberately carries no foreign key:
    // audit rows must survive deletion of the task they reference.
    r"
    CREATE TABLE IF NOT EXISTS audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL DEFAULT (datetime('now')),
        task_id TEXT,
        action_type TEXT NOT NULL,
        memory_operation_type TEXT
            CHECK (memory_operation_type IS NULL
                   OR memory_operation_type IN ('create','update','delete')),
        memory_namespace TEXT,
        memory_entry_id INTEGER,
        action_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(action_data))
    )",
    // Performance and operational metrics
    r"
    CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        value REAL NOT NULL,
        labels TEXT CHECK (labels IS NULL OR json_valid(labels)),
        recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    // Loop execution checkpoints
    r"
    CREATE TABLE IF NOT EXISTS checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        iteration INTEGER NOT NULL DEFAULT 0,
        checkpoint_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(checkpoint_data)),
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
];

/// Index DDL. The dispatch-critical ones are partial indexes so the hot
/// queries stay narrow; query-plan tests pin their usage.
const CREATE_INDEXES: &[&str] = &[
    // tasks
    "CREATE INDEX IF NOT EXISTS idx_tasks_ready_priority
        ON tasks (calculated_priority DESC, submitted_at ASC) WHERE status = 'ready'",
    "CREATE INDEX IF NOT EXISTS idx_tasks_blocked
        ON tasks (last_updated_at) WHERE status = 'blocked'",
    "CREATE INDEX IF NOT EXISTS idx_tasks_deadline
        ON tasks (deadline) WHERE deadline IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_tasks_source_created ON tasks (source, submitted_at)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks (parent_task_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_agent_type ON tasks (agent_type)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_submitted_at ON tasks (submitted_at)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_completed_at ON tasks (completed_at)",
    // task_dependencies
    "CREATE INDEX IF NOT EXISTS idx_task_dependencies_prerequisite
        ON task_dependencies (prerequisite_task_id) WHERE resolved_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_task_dependencies_dependent
        ON task_dependencies (dependent_task_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_dependencies_unresolved
        ON task_dependencies (dependent_task_id, prerequisite_task_id) WHERE resolved_at IS NULL",
    // sessions
    "CREATE INDEX IF NOT EXISTS idx_sessions_status_updated
        ON sessions (status, last_update_time)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_app_user ON sessions (app_name, user_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions (project_id)",
    // memory_entries
    "CREATE INDEX IF NOT EXISTS idx_memory_namespace_key_version
        ON memory_entries (namespace, key, version DESC)",
    "CREATE INDEX IF NOT EXISTS idx_memory_namespace_prefix
        ON memory_entries (namespace COLLATE NOCASE, is_deleted)",
    "CREATE INDEX IF NOT EXISTS idx_memory_type ON memory_entries (memory_type)",
    "CREATE INDEX IF NOT EXISTS idx_memory_updated ON memory_entries (updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_memory_active
        ON memory_entries (namespace, key) WHERE is_deleted = 0",
    "CREATE INDEX IF NOT EXISTS idx_memory_created_by ON memory_entries (created_by)",
    // audit
    "CREATE INDEX IF NOT EXISTS idx_audit_memory_operations
        ON audit (memory_operation_type, memory_namespace)
        WHERE memory_operation_type IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_audit_task ON audit (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_audit_action_type ON audit (action_type)",
    // agents
    "CREATE INDEX IF NOT EXISTS idx_agents_task ON agents (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_agents_state ON agents (state)",
    // document_index
    "CREATE INDEX IF NOT EXISTS idx_document_index_updated ON document_index (updated_at)",
    // metrics
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_time ON metrics (name, recorded_at)",
    // checkpoints
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_task ON checkpoints (task_id, iteration)",
];

/// Bring the schema fully up to date. Idempotent.
pub async fn initialize(pool: &SqlitePool) -> Result<(), DatabaseError> {
    for ddl in CREATE_TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Migration(format!("create table failed: {e}")))?;
    }

    // Columns added after the original release. Databases created by this
    // build already have them in the CREATE TABLE; older databases pick
    // them up here. Re-running is a no-op either way.
    add_column_if_missing(pool, "tasks", "summary", "TEXT").await?;
    add_column_if_missing(pool, "tasks", "feature_branch", "TEXT").await?;
    add_column_if_missing(pool, "tasks", "task_branch", "TEXT").await?;
    add_column_if_missing(pool, "tasks", "worktree_path", "TEXT").await?;
    add_column_if_missing(pool, "tasks", "estimated_duration_seconds", "INTEGER").await?;
    add_column_if_missing(pool, "sessions", "metadata", "TEXT").await?;

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Migration(format!("create index failed: {e}")))?;
    }

    Ok(())
}

/// Add a column only if it does not already exist.
///
/// SQLite has no `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`, so existence
/// is probed through `PRAGMA table_info` first.
pub async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<bool, DatabaseError> {
    if column_exists(pool, table, column).await? {
        debug!(table, column, "column already present, skipping");
        return Ok(false);
    }

    let ddl = format!("ALTER TABLE {table} ADD COLUMN {column} {definition}");
    sqlx::query(&ddl)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("add column {table}.{column} failed: {e}")))?;
    debug!(table, column, "column added");
    Ok(true)
}

/// Check whether a column exists on a table.
pub async fn column_exists(
    pool: &SqlitePool,
    table: &str,
    column: &str,
) -> Result<bool, DatabaseError> {
    let sql = format!("PRAGMA table_info({table})");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    for row in rows {
        let name: String = row.try_get("name").map_err(DatabaseError::from)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Names of all user-defined indexes.
pub async fn index_names(pool: &SqlitePool) -> Result<Vec<String>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut names = Vec::new();
    for row in rows {
        names.push(row.try_get::<String, _>("name").map_err(DatabaseError::from)?);
    }
    Ok(names)
}

/// Names of all user tables.
pub async fn table_names(pool: &SqlitePool) -> Result<Vec<String>, DatabaseError> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut names = Vec::new();
    for row in rows {
        names.push(row.try_get::<String, _>("name").map_err(DatabaseError::from)?);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fresh_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_expected_tables() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();

        let tables = table_names(&pool).await.unwrap();
        for expected in [
            "tasks",
            "task_dependencies",
            "sessions",
            "memory_entries",
            "document_index",
            "agents",
            "state",
            "audit",
            "metrics",
            "checkpoints",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();

        let tables_first = table_names(&pool).await.unwrap();
        let indexes_first = index_names(&pool).await.unwrap();

        // Second run must be a no-op with no errors
        initialize(&pool).await.unwrap();

        assert_eq!(tables_first, table_names(&pool).await.unwrap());
        assert_eq!(indexes_first, index_names(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_minimum_index_floor() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();
        let indexes = index_names(&pool).await.unwrap();
        assert!(
            indexes.len() >= 30,
            "expected at least 30 indexes, found {}",
            indexes.len()
        );
    }

    #[tokio::test]
    async fn test_required_index_names_present() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();
        let indexes = index_names(&pool).await.unwrap();
        for required in [
            "idx_tasks_ready_priority",
            "idx_tasks_source_created",
            "idx_tasks_deadline",
            "idx_tasks_blocked",
            "idx_task_dependencies_prerequisite",
            "idx_task_dependencies_dependent",
            "idx_memory_namespace_key_version",
            "idx_memory_namespace_prefix",
            "idx_sessions_status_updated",
            "idx_audit_memory_operations",
        ] {
            assert!(
                indexes.iter().any(|i| i == required),
                "missing index {required}"
            );
        }
    }

    #[tokio::test]
    async fn test_add_column_if_missing_is_guarded() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();

        // Already present: no-op
        let added = add_column_if_missing(&pool, "tasks", "summary", "TEXT")
            .await
            .unwrap();
        assert!(!added);

        // Genuinely new column gets added exactly once
        let added = add_column_if_missing(&pool, "tasks", "test_extra", "TEXT")
            .await
            .unwrap();
        assert!(added);
        let added_again = add_column_if_missing(&pool, "tasks", "test_extra", "TEXT")
            .await
            .unwrap();
        assert!(!added_again);
    }

    #[tokio::test]
    async fn test_json_validation_rejects_malformed_input() {
        let pool = fresh_pool().await;
        initialize(&pool).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO sessions (id, app_name, user_id, events, state)
             VALUES ('s1', 'abathur', 'alice', 'not json', '{}')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err(), "malformed events JSON must be rejected");

        let result = sqlx::query(
            "INSERT INTO memory_entries (namespace, key, value, memory_type)
             VALUES ('user:a:b', 'k', '{broken', 'semantic')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err(), "malformed memory value must be rejected");
    }
}
