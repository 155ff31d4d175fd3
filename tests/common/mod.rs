//! Shared test fixtures.
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use abathur::infrastructure::database::{
    Database, MemoryRepo, SessionRepo, TaskRepo, TreeOperations,
};
use abathur::services::{
    DependencyResolver, MemoryService, PriorityCalculator, SessionService, TaskQueueService,
};

/// A file-backed test database. The tempdir must outlive the handle.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("abathur-test.db");
        let db = Database::connect(&format!("sqlite:{}", path.display()))
            .await
            .expect("connect test database");
        Self { db, _dir: dir }
    }
}

/// The full service stack over one test database.
pub struct TestServices {
    pub db: TestDb,
    pub task_repo: Arc<TaskRepo>,
    pub resolver: Arc<DependencyResolver>,
    pub priority: Arc<PriorityCalculator>,
    pub queue: Arc<TaskQueueService>,
    pub memory: Arc<MemoryService>,
    pub sessions: Arc<SessionService>,
    pub tree_ops: Arc<TreeOperations>,
}

impl TestServices {
    pub async fn new() -> Self {
        let db = TestDb::new().await;
        let pool = db.db.pool().clone();

        let task_repo = Arc::new(TaskRepo::new(pool.clone()));
        let resolver = Arc::new(DependencyResolver::new(task_repo.clone()));
        let priority = Arc::new(PriorityCalculator::new(task_repo.clone(), resolver.clone()));
        let queue = Arc::new(TaskQueueService::new(
            task_repo.clone(),
            resolver.clone(),
            priority.clone(),
        ));
        let memory = Arc::new(MemoryService::new(Arc::new(MemoryRepo::new(pool.clone()))));
        let sessions = Arc::new(SessionService::new(Arc::new(SessionRepo::new(pool.clone()))));
        let tree_ops = Arc::new(TreeOperations::new(pool));

        Self {
            db,
            task_repo,
            resolver,
            priority,
            queue,
            memory,
            sessions,
            tree_ops,
        }
    }
}
