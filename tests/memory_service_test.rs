//! Memory service integration tests: versioning, soft delete, search,
//! audit coupling, TTL cleanup.

mod common;

use common::TestServices;

use abathur::domain::models::{MemoryOperation, MemoryType};
use abathur::infrastructure::database::AuditRepo;

// Create, update twice, delete: history and audit trail line up.
#[tokio::test]
async fn test_versioning_lifecycle_and_audit_trail() {
    let svc = TestServices::new().await;
    let audit = AuditRepo::new(svc.db.db.pool().clone());

    let ns = "user:alice:pref";
    svc.memory
        .add_memory(
            ns,
            "theme",
            serde_json::json!({"mode": "dark"}),
            MemoryType::Semantic,
            "sess",
            Some("task"),
            None,
        )
        .await
        .unwrap();
    svc.memory
        .update_memory(ns, "theme", serde_json::json!({"mode": "light"}), "sess", Some("task"))
        .await
        .unwrap();
    svc.memory
        .update_memory(ns, "theme", serde_json::json!({"mode": "auto"}), "sess", Some("task"))
        .await
        .unwrap();
    svc.memory.delete_memory(ns, "theme", Some("task")).await.unwrap();

    // History: three rows, version-descending
    let history = svc.memory.get_memory_history(ns, "theme").await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].version, 3);
    assert_eq!(history[1].version, 2);
    assert_eq!(history[2].version, 1);
    assert!(history.iter().all(|entry| entry.is_deleted));

    // All versions soft-deleted: reads answer None
    assert!(svc.memory.get_memory(ns, "theme", None).await.unwrap().is_none());

    // Audit trail: create, update, update, delete in order
    let entries = audit.list_memory_operations(ns).await.unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].memory_operation_type, Some(MemoryOperation::Create));
    assert_eq!(entries[1].memory_operation_type, Some(MemoryOperation::Update));
    assert_eq!(entries[2].memory_operation_type, Some(MemoryOperation::Update));
    assert_eq!(entries[3].memory_operation_type, Some(MemoryOperation::Delete));
    assert!(entries.iter().all(|e| e.task_id.as_deref() == Some("task")));
}

#[tokio::test]
async fn test_get_returns_latest_version() {
    let svc = TestServices::new().await;
    let ns = "user:bob:settings";

    svc.memory
        .add_memory(ns, "lang", serde_json::json!("en"), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .update_memory(ns, "lang", serde_json::json!("de"), "s", None)
        .await
        .unwrap();

    let latest = svc.memory.get_memory(ns, "lang", None).await.unwrap().unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.value, serde_json::json!("de"));

    // Explicit version still reachable
    let v1 = svc.memory.get_memory(ns, "lang", Some(1)).await.unwrap().unwrap();
    assert_eq!(v1.value, serde_json::json!("en"));
}

#[tokio::test]
async fn test_versions_strictly_monotonic() {
    let svc = TestServices::new().await;
    let ns = "app:abathur:counters";

    svc.memory
        .add_memory(ns, "n", serde_json::json!(0), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();

    let mut last_version = 1;
    for i in 1..=5 {
        svc.memory
            .update_memory(ns, "n", serde_json::json!(i), "s", None)
            .await
            .unwrap();
        let current = svc.memory.get_memory(ns, "n", None).await.unwrap().unwrap();
        assert!(current.version > last_version, "versions must strictly increase");
        last_version = current.version;
    }
    assert_eq!(last_version, 6);
}

#[tokio::test]
async fn test_update_missing_memory_fails() {
    let svc = TestServices::new().await;
    let result = svc
        .memory
        .update_memory("user:x:y", "ghost", serde_json::json!(1), "s", None)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_delete_missing_memory_returns_false() {
    let svc = TestServices::new().await;
    let deleted = svc.memory.delete_memory("user:x:y", "ghost", None).await.unwrap();
    assert!(!deleted);
}

#[tokio::test]
async fn test_namespace_must_contain_separator() {
    let svc = TestServices::new().await;
    let result = svc
        .memory
        .add_memory("flat", "k", serde_json::json!(1), MemoryType::Semantic, "s", None, None)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_prefix_search_scopes_and_orders() {
    let svc = TestServices::new().await;

    for (ns, key) in [
        ("user:alice:prefs", "a"),
        ("user:alice:projects", "b"),
        ("user:bob:prefs", "c"),
    ] {
        svc.memory
            .add_memory(ns, key, serde_json::json!({}), MemoryType::Semantic, "s", None, None)
            .await
            .unwrap();
    }

    let alice = svc.memory.search_memories("user:alice", None, 50).await.unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|e| e.namespace.starts_with("user:alice")));

    let everyone = svc.memory.search_memories("user:", None, 50).await.unwrap();
    assert_eq!(everyone.len(), 3);

    let limited = svc.memory.search_memories("user:", None, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_search_filters_by_type() {
    let svc = TestServices::new().await;

    svc.memory
        .add_memory("task:1:facts", "f", serde_json::json!(1), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .add_memory("task:1:log", "l", serde_json::json!(2), MemoryType::Episodic, "s", None, None)
        .await
        .unwrap();

    let episodic = svc
        .memory
        .search_memories("task:1", Some(MemoryType::Episodic), 50)
        .await
        .unwrap();
    assert_eq!(episodic.len(), 1);
    assert_eq!(episodic[0].memory_type, MemoryType::Episodic);
}

#[tokio::test]
async fn test_list_namespaces() {
    let svc = TestServices::new().await;

    svc.memory
        .add_memory("user:a:x", "k", serde_json::json!(1), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .add_memory("user:b:y", "k", serde_json::json!(1), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();

    let namespaces = svc.memory.list_namespaces().await.unwrap();
    assert_eq!(namespaces, vec!["user:a:x".to_string(), "user:b:y".to_string()]);
}

#[tokio::test]
async fn test_cleanup_expires_only_old_episodic() {
    let svc = TestServices::new().await;

    svc.memory
        .add_memory("temp:old", "e", serde_json::json!(1), MemoryType::Episodic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .add_memory("temp:semantic", "f", serde_json::json!(2), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();

    // Backdate the episodic row past the TTL
    sqlx::query(
        "UPDATE memory_entries SET created_at = datetime('now', '-120 days')
         WHERE namespace = 'temp:old'",
    )
    .execute(svc.db.db.pool())
    .await
    .unwrap();

    let expired = svc.memory.cleanup_expired_memories(90).await.unwrap();
    assert_eq!(expired, 1);

    assert!(svc.memory.get_memory("temp:old", "e", None).await.unwrap().is_none());
    assert!(svc
        .memory
        .get_memory("temp:semantic", "f", None)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_prune_memories_by_prefix_and_type() {
    let svc = TestServices::new().await;

    svc.memory
        .add_memory("scratch:a", "x", serde_json::json!(1), MemoryType::Episodic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .add_memory("scratch:b", "y", serde_json::json!(2), MemoryType::Semantic, "s", None, None)
        .await
        .unwrap();
    svc.memory
        .add_memory("keep:c", "z", serde_json::json!(3), MemoryType::Episodic, "s", None, None)
        .await
        .unwrap();

    let pruned = svc
        .memory
        .prune_memories("scratch:", Some(MemoryType::Episodic), None)
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    assert!(svc.memory.get_memory("scratch:a", "x", None).await.unwrap().is_none());
    assert!(svc.memory.get_memory("scratch:b", "y", None).await.unwrap().is_some());
    assert!(svc.memory.get_memory("keep:c", "z", None).await.unwrap().is_some());
}
