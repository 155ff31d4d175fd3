//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute. Prerequisite
//! edges between tasks form a DAG; `parent_task_id` forms a separate
//! tree used by hierarchical prune.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Maximum length of an auto-generated or user-supplied summary.
pub const MAX_SUMMARY_LENGTH: usize = 140;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but dependencies not yet evaluated
    Pending,
    /// Task is waiting on unresolved prerequisites
    Blocked,
    /// Task is eligible for dispatch (all prerequisites resolved)
    Ready,
    /// Task is currently being executed by an agent
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed during execution
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Ready, Self::Blocked, Self::Cancelled],
            Self::Blocked => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::Running, Self::Blocked, Self::Pending, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Ready, Self::Cancelled],
            Self::Failed => &[Self::Ready], // Retry budget permitting
            Self::Completed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// All statuses, in display order.
    pub fn all() -> &'static [TaskStatus] {
        &[
            Self::Pending,
            Self::Blocked,
            Self::Ready,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "blocked" => Ok(Self::Blocked),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvalidEnumValue {
                kind: "TaskStatus",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a task originated from.
///
/// Human-submitted tasks outrank agent-generated work in the priority
/// calculator's source factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Submitted directly by a human
    Human,
    /// Created by a requirements-gathering agent
    AgentRequirements,
    /// Created by a planning agent
    AgentPlanner,
    /// Created by an implementation agent
    AgentImplementation,
}

impl Default for TaskSource {
    fn default() -> Self {
        Self::Human
    }
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::AgentRequirements => "agent_requirements",
            Self::AgentPlanner => "agent_planner",
            Self::AgentImplementation => "agent_implementation",
        }
    }
}

impl std::str::FromStr for TaskSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "agent_requirements" => Ok(Self::AgentRequirements),
            "agent_planner" => Ok(Self::AgentPlanner),
            "agent_implementation" => Ok(Self::AgentImplementation),
            other => Err(DomainError::InvalidEnumValue {
                kind: "TaskSource",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TaskSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task relates to its prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Must run strictly after its prerequisites
    Sequential,
    /// May run alongside sibling tasks once prerequisites resolve
    Parallel,
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Sequential
    }
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl std::str::FromStr for DependencyType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(DomainError::InvalidEnumValue {
                kind: "DependencyType",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete unit of work scheduled through the task queue.
///
/// Serializes to exactly 29 fields; shrinking this surface has broken
/// downstream consumers before, so the serialization round-trip is pinned
/// by integration tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Full prompt text handed to the executor
    pub prompt: String,
    /// Short human-readable summary (≤140 chars, auto-generated if absent)
    pub summary: Option<String>,
    /// Executor profile that should run this task
    pub agent_type: String,
    /// User-supplied base priority (0-10)
    pub priority: u8,
    /// Derived priority score (0-100), recomputed by the priority calculator
    pub calculated_priority: f64,
    /// Current status
    pub status: TaskStatus,
    /// Where this task originated from
    pub source: TaskSource,
    /// Prerequisite relationship semantics
    pub dependency_type: DependencyType,
    /// Longest path from a DAG root to this task
    pub dependency_depth: u32,
    /// Prerequisite task IDs
    pub dependencies: Vec<Uuid>,
    /// Structured input payload
    pub input_data: Option<serde_json::Value>,
    /// Structured result payload
    pub result_data: Option<serde_json::Value>,
    /// Error from the most recent failed execution
    pub error_message: Option<String>,
    /// Retries consumed so far
    pub retry_count: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Per-execution timeout enforced by the worker
    pub max_execution_timeout_seconds: u32,
    /// Estimated execution time, used by deadline urgency scoring
    pub estimated_duration_seconds: Option<u32>,
    /// Optional deadline
    pub deadline: Option<DateTime<Utc>>,
    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Updated on every status transition
    pub last_updated_at: DateTime<Utc>,
    /// Hierarchical parent (tree structure, distinct from the DAG)
    pub parent_task_id: Option<Uuid>,
    /// Owning session, if any
    pub session_id: Option<String>,
    /// Feature branch this task contributes to
    pub feature_branch: Option<String>,
    /// Per-task working branch
    pub task_branch: Option<String>,
    /// Git worktree path, if isolated
    pub worktree_path: Option<String>,
    /// Submitter identity
    pub created_by: Option<String>,
}

impl Task {
    /// Create a new pending task from a prompt.
    ///
    /// The summary is auto-generated from the prompt and source.
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let now = Utc::now();
        let mut task = Self {
            id: Uuid::new_v4(),
            summary: None,
            agent_type: "requirements-gatherer".to_string(),
            priority: 5,
            calculated_priority: 0.0,
            status: TaskStatus::default(),
            source: TaskSource::default(),
            dependency_type: DependencyType::default(),
            dependency_depth: 0,
            dependencies: Vec::new(),
            input_data: None,
            result_data: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            max_execution_timeout_seconds: 3600,
            estimated_duration_seconds: None,
            deadline: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            last_updated_at: now,
            parent_task_id: None,
            session_id: None,
            feature_branch: None,
            task_branch: None,
            worktree_path: None,
            created_by: None,
            prompt,
        };
        task.summary = Some(generate_summary(&task.prompt, task.source));
        task
    }

    /// Set the task source and regenerate the summary if it was derived.
    pub fn with_source(mut self, source: TaskSource) -> Self {
        let derived = self.summary.as_deref() == Some(&generate_summary(&self.prompt, self.source));
        self.source = source;
        if derived || self.summary.is_none() {
            self.summary = Some(generate_summary(&self.prompt, source));
        }
        self
    }

    /// Set an explicit summary, truncated to the 140-char cap.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(truncate_chars(&summary.into(), MAX_SUMMARY_LENGTH));
        self
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Add a prerequisite. Self-edges and duplicates are ignored here and
    /// rejected again at validation time.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if task_id != self.id && !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    pub fn with_dependencies(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        for id in ids {
            self = self.with_dependency(id);
        }
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_id);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_estimated_duration(mut self, seconds: u32) -> Self {
        self.estimated_duration_seconds = Some(seconds);
        self
    }

    pub fn with_input_data(mut self, input: serde_json::Value) -> Self {
        self.input_data = Some(input);
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Check if can transition to the given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating timestamps.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        self.status = new_status;
        self.last_updated_at = Utc::now();

        match new_status {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the retry budget allows another attempt.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Validate invariants that must hold before persistence.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.priority > 10 {
            return Err(DomainError::ValidationFailed(format!(
                "priority must be between 0 and 10, got {}",
                self.priority
            )));
        }
        if let Some(summary) = &self.summary {
            if summary.chars().count() > MAX_SUMMARY_LENGTH {
                return Err(DomainError::ValidationFailed(format!(
                    "summary exceeds {MAX_SUMMARY_LENGTH} characters"
                )));
            }
        }
        if self.retry_count > self.max_retries {
            return Err(DomainError::ValidationFailed(format!(
                "retry_count {} exceeds max_retries {}",
                self.retry_count, self.max_retries
            )));
        }
        if self.dependencies.contains(&self.id) {
            return Err(DomainError::ValidationFailed(
                "task cannot depend on itself".to_string(),
            ));
        }
        Ok(())
    }

    /// Summary for display, falling back to generation from the prompt.
    pub fn display_summary(&self) -> String {
        self.summary
            .clone()
            .unwrap_or_else(|| generate_summary(&self.prompt, self.source))
    }
}

/// Generate a summary from a prompt.
///
/// Human-submitted prompts are prefixed with `"User Prompt: "`; agent
/// prompts are used bare. An empty prompt yields `"Task"`. The result is
/// truncated to 140 characters.
pub fn generate_summary(prompt: &str, source: TaskSource) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return "Task".to_string();
    }
    let text = match source {
        TaskSource::Human => format!("User Prompt: {trimmed}"),
        _ => trimmed.to_string(),
    };
    truncate_chars(&text, MAX_SUMMARY_LENGTH)
}

/// Truncate a string to `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation_defaults() {
        let task = Task::new("Implement the login feature");
        assert_eq!(task.prompt, "Implement the login feature");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 5);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.retry_count, 0);
        assert!(task.dependencies.is_empty());
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_summary_generation_human_prefix() {
        let task = Task::new("Fix the parser").with_source(TaskSource::Human);
        assert_eq!(task.summary.as_deref(), Some("User Prompt: Fix the parser"));
    }

    #[test]
    fn test_summary_generation_agent_bare() {
        let task = Task::new("Fix the parser").with_source(TaskSource::AgentPlanner);
        assert_eq!(task.summary.as_deref(), Some("Fix the parser"));
    }

    #[test]
    fn test_summary_generation_empty_prompt() {
        assert_eq!(generate_summary("", TaskSource::Human), "Task");
        assert_eq!(generate_summary("   ", TaskSource::AgentPlanner), "Task");
    }

    #[test]
    fn test_summary_boundary_140_chars_preserved() {
        let exact = "x".repeat(140);
        let task = Task::new("p").with_summary(exact.clone());
        assert_eq!(task.summary.as_deref(), Some(exact.as_str()));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_summary_141_chars_truncated_not_rejected() {
        let over = "x".repeat(141);
        let task = Task::new("p").with_summary(over);
        assert_eq!(task.summary.as_ref().map(|s| s.chars().count()), Some(140));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_priority_validation() {
        let task = Task::new("p").with_priority(11);
        assert!(task.validate().is_err());

        let task = Task::new("p").with_priority(10);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut task = Task::new("p");
        let id = task.id;
        // Builder silently drops the self-edge
        task = task.with_dependency(id);
        assert!(task.dependencies.is_empty());

        // A forced self-edge fails validation
        task.dependencies.push(id);
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_state_transitions_happy_path() {
        let mut task = Task::new("p");

        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());

        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_blocked_to_ready() {
        let mut task = Task::new("p");
        task.transition_to(TaskStatus::Blocked).unwrap();
        assert!(task.transition_to(TaskStatus::Ready).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        // Pending -> Running must go through Ready
        let mut task = Task::new("p");
        assert!(task.transition_to(TaskStatus::Running).is_err());

        // Blocked -> Running must go through Ready
        let mut task = Task::new("p");
        task.transition_to(TaskStatus::Blocked).unwrap();
        assert!(task.transition_to(TaskStatus::Running).is_err());

        // Terminal states are final
        let mut task = Task::new("p");
        task.transition_to(TaskStatus::Cancelled).unwrap();
        assert!(task.transition_to(TaskStatus::Ready).is_err());
    }

    #[test]
    fn test_failed_to_ready_for_retry() {
        let mut task = Task::new("p");
        task.transition_to(TaskStatus::Ready).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Failed).unwrap();
        assert!(task.can_retry());
        assert!(task.transition_to(TaskStatus::Ready).is_ok());
    }

    #[test]
    fn test_transitions_update_timestamp() {
        let mut task = Task::new("p");
        let before = task.last_updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        task.transition_to(TaskStatus::Ready).unwrap();
        assert!(task.last_updated_at > before);
    }

    #[test]
    fn test_status_round_trip() {
        for status in TaskStatus::all() {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_source_round_trip() {
        for source in [
            TaskSource::Human,
            TaskSource::AgentRequirements,
            TaskSource::AgentPlanner,
            TaskSource::AgentImplementation,
        ] {
            let parsed: TaskSource = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
        assert!("robot".parse::<TaskSource>().is_err());
    }

    #[test]
    fn test_serializes_to_29_fields() {
        let task = Task::new("Serialize me");
        let value = serde_json::to_value(&task).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 29, "Task must serialize to exactly 29 fields");
        assert!(map.contains_key("dependencies"));
        assert!(map.contains_key("calculated_priority"));
        assert_eq!(map["status"], "pending");
    }

    #[test]
    fn test_serialization_round_trip() {
        let task = Task::new("Round trip")
            .with_source(TaskSource::AgentPlanner)
            .with_priority(7)
            .with_dependency(Uuid::new_v4())
            .with_deadline(Utc::now() + chrono::Duration::hours(4));
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn test_unknown_enum_value_errors_on_deserialize() {
        let task = Task::new("p");
        let mut value = serde_json::to_value(&task).unwrap();
        value["status"] = serde_json::json!("exploded");
        assert!(serde_json::from_value::<Task>(value).is_err());
    }
}
