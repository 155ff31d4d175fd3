//! Domain models.

pub mod agent;
pub mod audit;
pub mod config;
pub mod dependency;
pub mod memory;
pub mod prune;
pub mod session;
pub mod task;

pub use agent::{Agent, AgentState, TaskResult};
pub use audit::{AuditEntry, MemoryOperation};
pub use config::{Config, McpServerConfig, QueueConfig, SwarmConfig};
pub use dependency::TaskDependency;
pub use memory::{MemoryEntry, MemoryType};
pub use prune::{
    PruneFilters, PruneResult, RecursivePruneResult, TreeNode, VacuumMode, PRUNEABLE_STATUSES,
};
pub use session::{Event, Session, SessionStatus};
pub use task::{generate_summary, DependencyType, Task, TaskSource, TaskStatus};
