//! Live agent worker records and execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Lifecycle state of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Spawning,
    Idle,
    Busy,
    Terminating,
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spawning" => Ok(Self::Spawning),
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            other => Err(DomainError::InvalidEnumValue {
                kind: "AgentState",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live worker record corresponding to one executor invocation.
///
/// Rows are cascade-deleted with their task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    pub task_id: Uuid,
    pub state: AgentState,
    pub model: String,
    pub spawned_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub resource_usage: serde_json::Value,
}

impl Agent {
    pub fn new(name: impl Into<String>, specialization: impl Into<String>, task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            specialization: specialization.into(),
            task_id,
            state: AgentState::Spawning,
            model: String::new(),
            spawned_at: Utc::now(),
            terminated_at: None,
            resource_usage: serde_json::json!({}),
        }
    }
}

/// Outcome of one executor invocation, reported back to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskResult {
    pub fn success(task_id: Uuid, agent_id: Uuid) -> Self {
        Self {
            task_id,
            agent_id,
            success: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(task_id: Uuid, agent_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            agent_id,
            success: false,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }
}
