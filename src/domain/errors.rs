//! Domain errors for the Abathur swarm system.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Abathur system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Memory not found: {namespace}:{key}")]
    MemoryNotFound { namespace: String, key: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Circular dependency detected. Cycles found:\n{}", format_cycles(.cycles))]
    CircularDependency { cycles: Vec<Vec<Uuid>> },

    #[error("Invalid {kind} value: {value}")]
    InvalidEnumValue { kind: &'static str, value: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::infrastructure::database::DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Build a circular-dependency error from one cycle path.
    pub fn cycle(path: Vec<Uuid>) -> Self {
        Self::CircularDependency { cycles: vec![path] }
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(db) if db.is_retryable())
    }
}

fn format_cycles(cycles: &[Vec<Uuid>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let chain = cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            format!("  - {chain}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
