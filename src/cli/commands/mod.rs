//! Command handlers.

pub mod mcp;
pub mod memory;
pub mod task;

use std::sync::Arc;

use crate::application::McpManager;
use crate::infrastructure::database::TreeOperations;
use crate::services::{MemoryService, SessionService, TaskQueueService};

/// Services wired up once in `main` and shared by the handlers.
pub struct AppContext {
    pub task_queue: Arc<TaskQueueService>,
    pub memory: Arc<MemoryService>,
    pub sessions: Arc<SessionService>,
    pub tree_ops: Arc<TreeOperations>,
    pub mcp: Arc<McpManager>,
}
