//! Append-only audit trail entries.
//!
//! Audit rows are never cascade-deleted: they survive the deletion of the
//! task they reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Kind of memory mutation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOperation {
    Create,
    Update,
    Delete,
}

impl MemoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for MemoryOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(DomainError::InvalidEnumValue {
                kind: "MemoryOperation",
                value: other.to_string(),
            }),
        }
    }
}

/// One audit trail row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    /// Referenced task, kept as a bare string so the row outlives the task
    pub task_id: Option<String>,
    /// e.g. "task_completed", "task_failed", "memory_create"
    pub action_type: String,
    pub memory_operation_type: Option<MemoryOperation>,
    pub memory_namespace: Option<String>,
    pub memory_entry_id: Option<i64>,
    pub action_data: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action_type: impl Into<String>, action_data: serde_json::Value) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            task_id: None,
            action_type: action_type.into(),
            memory_operation_type: None,
            memory_namespace: None,
            memory_entry_id: None,
            action_data,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_memory_operation(
        mut self,
        operation: MemoryOperation,
        namespace: impl Into<String>,
        entry_id: Option<i64>,
    ) -> Self {
        self.memory_operation_type = Some(operation);
        self.memory_namespace = Some(namespace.into());
        self.memory_entry_id = entry_id;
        self
    }
}
