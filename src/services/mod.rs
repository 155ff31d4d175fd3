//! Service layer: scheduling, priority, sessions, memory.

pub mod dependency_resolver;
pub mod memory_service;
pub mod priority_calculator;
pub mod session_service;
pub mod task_queue_service;

pub use dependency_resolver::DependencyResolver;
pub use memory_service::MemoryService;
pub use priority_calculator::{PriorityCalculator, PriorityWeights};
pub use session_service::SessionService;
pub use task_queue_service::TaskQueueService;
