//! Store-level integration tests: schema, cascades, JSON validation,
//! index usage, and migration idempotency.

mod common;

use common::TestDb;
use sqlx::Row;
use uuid::Uuid;

use abathur::domain::models::{Task, TaskDependency};
use abathur::infrastructure::database::{schema, TaskRepo};

#[tokio::test]
async fn test_integrity_check_reports_ok_after_init() {
    let test = TestDb::new().await;
    assert!(test.db.integrity_check().await.unwrap());
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let test = TestDb::new().await;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(test.db.pool())
        .await
        .unwrap();
    let mode: String = row.try_get(0).unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_synchronous_normal_or_full() {
    let test = TestDb::new().await;
    let row = sqlx::query("PRAGMA synchronous")
        .fetch_one(test.db.pool())
        .await
        .unwrap();
    let level: i64 = row.try_get(0).unwrap();
    // 1 = NORMAL, 2 = FULL
    assert!(level == 1 || level == 2, "synchronous was {level}");
}

#[tokio::test]
async fn test_migration_twice_produces_identical_schema() {
    let test = TestDb::new().await;

    let schema_sql = |pool: sqlx::SqlitePool| async move {
        sqlx::query("SELECT name, sql FROM sqlite_master ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|row| {
                (
                    row.try_get::<String, _>("name").unwrap(),
                    row.try_get::<Option<String>, _>("sql").unwrap(),
                )
            })
            .collect::<Vec<_>>()
    };

    let before = schema_sql(test.db.pool().clone()).await;
    test.db.migrate().await.expect("second migration must succeed");
    let after = schema_sql(test.db.pool().clone()).await;

    assert_eq!(before, after, "re-running migrations must not alter the schema");
}

#[tokio::test]
async fn test_deleting_task_cascades_dependency_edges() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let a = Task::new("prerequisite");
    let b = Task::new("dependent");
    repo.insert_with_dependencies(&a, &[]).await.unwrap();
    repo.insert_with_dependencies(&b, &[TaskDependency::new(b.id, a.id)])
        .await
        .unwrap();

    assert_eq!(repo.get_task_dependencies(b.id).await.unwrap().len(), 1);

    repo.delete(a.id).await.unwrap();
    assert_eq!(
        repo.get_task_dependencies(b.id).await.unwrap().len(),
        0,
        "edges must cascade with their endpoint"
    );
}

#[tokio::test]
async fn test_deleting_task_cascades_agent_rows() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let task = Task::new("worked on");
    repo.insert_with_dependencies(&task, &[]).await.unwrap();

    sqlx::query(
        "INSERT INTO agents (id, name, specialization, task_id, state, spawned_at)
         VALUES (?, 'worker-1', 'general', ?, 'busy', datetime('now'))",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(task.id.to_string())
    .execute(test.db.pool())
    .await
    .unwrap();

    repo.delete(task.id).await.unwrap();

    let count: i64 = sqlx::query("SELECT COUNT(*) FROM agents")
        .fetch_one(test.db.pool())
        .await
        .unwrap()
        .try_get(0)
        .unwrap();
    assert_eq!(count, 0, "agent rows must die with their task");
}

#[tokio::test]
async fn test_deleting_session_nulls_task_reference() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    sqlx::query(
        "INSERT INTO sessions (id, app_name, user_id) VALUES ('sess-1', 'abathur', 'alice')",
    )
    .execute(test.db.pool())
    .await
    .unwrap();

    let task = Task::new("session-bound").with_session("sess-1");
    repo.insert_with_dependencies(&task, &[]).await.unwrap();

    sqlx::query("DELETE FROM sessions WHERE id = 'sess-1'")
        .execute(test.db.pool())
        .await
        .unwrap();

    let fetched = repo.get(task.id).await.unwrap().unwrap();
    assert!(fetched.session_id.is_none(), "session_id must be set to NULL");
}

#[tokio::test]
async fn test_audit_rows_survive_task_deletion() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let task = Task::new("audited");
    // insert_with_dependencies writes a task_submitted audit row
    repo.insert_with_dependencies(&task, &[]).await.unwrap();
    repo.delete(task.id).await.unwrap();

    let count: i64 = sqlx::query("SELECT COUNT(*) FROM audit WHERE task_id = ?")
        .bind(task.id.to_string())
        .fetch_one(test.db.pool())
        .await
        .unwrap()
        .try_get(0)
        .unwrap();
    assert!(count >= 1, "audit rows must be orphan-preserved");
}

#[tokio::test]
async fn test_self_dependency_rejected_by_schema() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let task = Task::new("self-referential");
    repo.insert_with_dependencies(&task, &[]).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO task_dependencies (id, dependent_task_id, prerequisite_task_id, created_at)
         VALUES (?, ?, ?, datetime('now'))",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(task.id.to_string())
    .bind(task.id.to_string())
    .execute(test.db.pool())
    .await;
    assert!(result.is_err(), "self-dependency must violate the CHECK");
}

#[tokio::test]
async fn test_duplicate_dependency_edge_rejected() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let a = Task::new("a");
    let b = Task::new("b");
    repo.insert_with_dependencies(&a, &[]).await.unwrap();
    repo.insert_with_dependencies(&b, &[TaskDependency::new(b.id, a.id)])
        .await
        .unwrap();

    let result = sqlx::query(
        "INSERT INTO task_dependencies (id, dependent_task_id, prerequisite_task_id, created_at)
         VALUES (?, ?, ?, datetime('now'))",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(b.id.to_string())
    .bind(a.id.to_string())
    .execute(test.db.pool())
    .await;
    assert!(result.is_err(), "(dependent, prerequisite) must be unique");
}

#[tokio::test]
async fn test_malformed_json_rejected_at_insert() {
    let test = TestDb::new().await;

    let result = sqlx::query(
        "INSERT INTO sessions (id, app_name, user_id, events) VALUES ('s', 'a', 'u', '{oops')",
    )
    .execute(test.db.pool())
    .await;
    assert!(result.is_err());

    let result = sqlx::query(
        "INSERT INTO memory_entries (namespace, key, value, memory_type)
         VALUES ('a:b', 'k', 'nope', 'semantic')",
    )
    .execute(test.db.pool())
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_ready_dispatch_query_uses_priority_index() {
    let test = TestDb::new().await;
    let plan = test
        .db
        .explain_query_plan(
            "SELECT id FROM tasks WHERE status = 'ready'
             ORDER BY calculated_priority DESC, submitted_at ASC LIMIT 1",
        )
        .await
        .unwrap();
    let combined = plan.join("\n");
    assert!(
        combined.contains("idx_tasks_ready_priority"),
        "dispatch query must use its partial index, plan was:\n{combined}"
    );
}

#[tokio::test]
async fn test_unresolved_prerequisite_query_uses_index() {
    let test = TestDb::new().await;
    let plan = test
        .db
        .explain_query_plan(
            "SELECT dependent_task_id FROM task_dependencies
             WHERE prerequisite_task_id = 'abc' AND resolved_at IS NULL",
        )
        .await
        .unwrap();
    let combined = plan.join("\n");
    assert!(
        combined.contains("idx_task_dependencies_prerequisite")
            || combined.contains("idx_task_dependencies_unresolved"),
        "unblocking query must use a dependency index, plan was:\n{combined}"
    );
}

#[tokio::test]
async fn test_memory_lookup_uses_namespace_index() {
    let test = TestDb::new().await;
    let plan = test
        .db
        .explain_query_plan(
            "SELECT * FROM memory_entries
             WHERE namespace = 'user:a:b' AND key = 'k' AND is_deleted = 0
             ORDER BY version DESC LIMIT 1",
        )
        .await
        .unwrap();
    let combined = plan.join("\n");
    assert!(
        combined.contains("idx_memory"),
        "memory lookup must use a memory index, plan was:\n{combined}"
    );
}

#[tokio::test]
async fn test_session_status_query_uses_index() {
    let test = TestDb::new().await;
    let plan = test
        .db
        .explain_query_plan(
            "SELECT id FROM sessions WHERE status = 'active' ORDER BY last_update_time",
        )
        .await
        .unwrap();
    let combined = plan.join("\n");
    assert!(
        combined.contains("idx_sessions_status_updated"),
        "session scan must use its index, plan was:\n{combined}"
    );
}

#[tokio::test]
async fn test_task_round_trip_preserves_all_fields() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let original = Task::new("round trip everything")
        .with_source(abathur::domain::models::TaskSource::AgentPlanner)
        .with_priority(8)
        .with_agent_type("implementer")
        .with_deadline(chrono::Utc::now() + chrono::Duration::hours(6))
        .with_estimated_duration(1200)
        .with_input_data(serde_json::json!({"files": ["a.rs", "b.rs"]}))
        .with_created_by("tester");

    repo.insert_with_dependencies(&original, &[]).await.unwrap();
    let fetched = repo.get(original.id).await.unwrap().unwrap();

    // Serialized forms must agree on all 29 fields
    let left = serde_json::to_value(&original).unwrap();
    let right = serde_json::to_value(&fetched).unwrap();
    assert_eq!(left.as_object().unwrap().len(), 29);

    for (field, value) in left.as_object().unwrap() {
        if matches!(
            field.as_str(),
            "deadline" | "submitted_at" | "last_updated_at"
        ) {
            // Timestamps survive at second precision through RFC3339
            continue;
        }
        assert_eq!(&right[field], value, "field {field} diverged");
    }
}

#[tokio::test]
async fn test_validate_foreign_keys_clean_after_operations() {
    let test = TestDb::new().await;
    let repo = TaskRepo::new(test.db.pool().clone());

    let a = Task::new("a");
    let b = Task::new("b");
    repo.insert_with_dependencies(&a, &[]).await.unwrap();
    repo.insert_with_dependencies(&b, &[TaskDependency::new(b.id, a.id)])
        .await
        .unwrap();
    repo.delete(a.id).await.unwrap();

    let violations = test.db.validate_foreign_keys().await.unwrap();
    assert!(violations.is_empty(), "violations: {violations:?}");
}

#[tokio::test]
async fn test_add_column_if_missing_for_legacy_database() {
    let test = TestDb::new().await;

    // Simulate a legacy database missing a late column
    sqlx::query("ALTER TABLE tasks DROP COLUMN worktree_path")
        .execute(test.db.pool())
        .await
        .unwrap();
    assert!(!schema::column_exists(test.db.pool(), "tasks", "worktree_path")
        .await
        .unwrap());

    // Migration restores it, and a second run is a no-op
    test.db.migrate().await.unwrap();
    assert!(schema::column_exists(test.db.pool(), "tasks", "worktree_path")
        .await
        .unwrap());
    test.db.migrate().await.unwrap();
}
