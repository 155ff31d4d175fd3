//! Executor contract between the swarm and the inference layer.
//!
//! The core never talks to an AI service directly: it hands a task to an
//! injected [`AgentExecutor`] and consumes the [`TaskResult`].

use async_trait::async_trait;

use crate::domain::models::{Task, TaskResult};

/// Runs one task to completion and reports the outcome.
///
/// Implementations are free to spawn sub-processes, call HTTP APIs, or
/// stub everything out in tests. The swarm worker enforces the task's
/// `max_execution_timeout_seconds` around this call.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute_task(&self, task: &Task) -> anyhow::Result<TaskResult>;
}
