//! Dependency edges between tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::task::DependencyType;

/// A directed edge: the dependent cannot run until the prerequisite is
/// resolved. Edges are unique per (dependent, prerequisite) pair and
/// cascade-deleted with either endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: Uuid,
    pub dependent_task_id: Uuid,
    pub prerequisite_task_id: Uuid,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
    /// Set when the prerequisite completes; NULL edges are "unresolved".
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TaskDependency {
    pub fn new(dependent_task_id: Uuid, prerequisite_task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            dependent_task_id,
            prerequisite_task_id,
            dependency_type: DependencyType::default(),
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_type(mut self, dependency_type: DependencyType) -> Self {
        self.dependency_type = dependency_type;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_edge_is_unresolved() {
        let edge = TaskDependency::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(!edge.is_resolved());
        assert_eq!(edge.dependency_type, DependencyType::Sequential);
    }
}
