//! Session domain model.
//!
//! Sessions track conversation state: a strictly append-ordered event log
//! and a key-value state map with namespace-prefixed keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::DomainError;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created but not yet active
    Created,
    /// Session is active and accepting events
    Active,
    /// Session temporarily paused
    Paused,
    /// Session terminated, no further events accepted
    Terminated,
    /// Session archived for long-term storage
    Archived,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
            Self::Archived => "archived",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "terminated" => Ok(Self::Terminated),
            "archived" => Ok(Self::Archived),
            other => Err(DomainError::InvalidEnumValue {
                kind: "SessionStatus",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event in session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub event_id: String,
    /// ISO 8601 timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type (message|action|tool_call|reflection)
    pub event_type: String,
    /// Actor identifier (user|agent:<agent_id>|system)
    pub actor: String,
    /// Event-specific data
    pub content: HashMap<String, serde_json::Value>,
    /// Whether this is the final response in a conversation turn
    #[serde(default)]
    pub is_final_response: bool,
}

impl Event {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        actor: impl Into<String>,
        content: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            actor: actor.into(),
            content,
            is_final_response: false,
        }
    }

    pub fn with_final_response(mut self) -> Self {
        self.is_final_response = true;
        self
    }
}

/// Conversation session with event history and state management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Application context (e.g., "abathur")
    pub app_name: String,
    /// User identifier
    pub user_id: String,
    /// Optional project association for cross-agent collaboration
    pub project_id: Option<String>,
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Ordered list of events; newest at the end
    pub events: Vec<Event>,
    /// Key-value state storage with namespace-prefixed keys
    /// (e.g. "session:abc123:current_task", "user:alice:theme")
    pub state: HashMap<String, serde_json::Value>,
    /// Extensible metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Session creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub last_update_time: DateTime<Utc>,
    /// Termination timestamp (if terminated)
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        project_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            project_id,
            status: SessionStatus::Created,
            events: Vec::new(),
            state: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            last_update_time: now,
            terminated_at: None,
        }
    }
}
