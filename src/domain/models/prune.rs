//! Prune operation models and filters for task cleanup.
//!
//! Pruning operates on the parent/child tree, not the dependency DAG.
//! Only terminal tasks may be deleted, and a subtree is deletable only
//! when every node in it matches the allowed statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::task::TaskStatus;

/// VACUUM strategy after a prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VacuumMode {
    /// Always reclaim space after deletion
    Always,
    /// Reclaim unless the table is large (>10,000 tasks)
    Conditional,
    /// Never vacuum
    Never,
}

impl Default for VacuumMode {
    fn default() -> Self {
        Self::Conditional
    }
}

impl VacuumMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Conditional => "conditional",
            Self::Never => "never",
        }
    }
}

impl std::str::FromStr for VacuumMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "conditional" => Ok(Self::Conditional),
            "never" => Ok(Self::Never),
            other => Err(DomainError::InvalidEnumValue {
                kind: "VacuumMode",
                value: other.to_string(),
            }),
        }
    }
}

/// Task count above which conditional vacuum is skipped.
pub const VACUUM_SKIP_THRESHOLD: i64 = 10_000;

/// Statuses eligible for pruning. Anything non-terminal is forbidden.
pub const PRUNEABLE_STATUSES: [TaskStatus; 3] = [
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Cancelled,
];

/// Filtering criteria for a prune operation.
///
/// Supports three selection strategies which may be combined:
/// direct `task_ids`, status-based, and time-based
/// (`older_than_days` / `before_date`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneFilters {
    /// Specific task IDs to delete (direct selection)
    pub task_ids: Option<Vec<Uuid>>,
    /// Delete tasks older than N days (completed_at, falling back to submitted_at)
    pub older_than_days: Option<u32>,
    /// Delete tasks completed/submitted before this date
    pub before_date: Option<DateTime<Utc>>,
    /// Task statuses to prune (None with a time filter = all terminal statuses)
    pub statuses: Option<Vec<TaskStatus>>,
    /// Maximum tasks to delete in one operation
    pub limit: Option<u32>,
    /// Preview mode without deletion
    pub dry_run: bool,
    /// VACUUM strategy
    pub vacuum_mode: VacuumMode,
    /// Enable recursive tree deletion with status checking
    pub recursive: bool,
}

impl PruneFilters {
    /// Validate the filter combination and fill in defaults.
    ///
    /// At least one selection criterion must be present. Status filters
    /// may only name terminal statuses. Time-based selection without an
    /// explicit status filter defaults to the full terminal set.
    pub fn validate(mut self) -> Result<Self, DomainError> {
        let has_ids = self.task_ids.as_ref().is_some_and(|ids| !ids.is_empty());
        let has_time = self.older_than_days.is_some() || self.before_date.is_some();
        let has_status = self.statuses.as_ref().is_some_and(|s| !s.is_empty());

        if !(has_ids || has_time || has_status) {
            return Err(DomainError::ValidationFailed(
                "At least one selection criterion must be specified: \
                 'task_ids', 'older_than_days', 'before_date', or 'statuses'"
                    .to_string(),
            ));
        }

        if let Some(statuses) = &self.statuses {
            let invalid: Vec<_> = statuses
                .iter()
                .filter(|s| !PRUNEABLE_STATUSES.contains(s))
                .collect();
            if !invalid.is_empty() {
                let names: Vec<_> = invalid.iter().map(|s| s.as_str()).collect();
                return Err(DomainError::ValidationFailed(format!(
                    "Cannot prune tasks with statuses: {}. \
                     Only completed, failed, or cancelled tasks can be pruned.",
                    names.join(", ")
                )));
            }
        }

        // No explicit status filter still only ever touches terminal tasks
        if self.statuses.is_none() {
            self.statuses = Some(PRUNEABLE_STATUSES.to_vec());
        }

        Ok(self)
    }

    /// Build a SQL WHERE clause and bind parameters for task selection.
    ///
    /// Shared by the CLI preview query and the prune execution so both see
    /// the same rows.
    pub fn build_where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(ids) = &self.task_ids {
            if !ids.is_empty() {
                let placeholders = vec!["?"; ids.len()].join(",");
                clauses.push(format!("id IN ({placeholders})"));
                params.extend(ids.iter().map(ToString::to_string));
            }
        }

        if let Some(days) = self.older_than_days {
            clauses.push(
                "(completed_at < datetime('now', ?) OR \
                 (completed_at IS NULL AND submitted_at < datetime('now', ?)))"
                    .to_string(),
            );
            let days_param = format!("-{days} days");
            params.push(days_param.clone());
            params.push(days_param);
        } else if let Some(before) = self.before_date {
            clauses.push(
                "(completed_at < ? OR (completed_at IS NULL AND submitted_at < ?))".to_string(),
            );
            let before_iso = before.to_rfc3339();
            params.push(before_iso.clone());
            params.push(before_iso);
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.is_empty() {
                let placeholders = vec!["?"; statuses.len()].join(",");
                clauses.push(format!("status IN ({placeholders})"));
                params.extend(statuses.iter().map(|s| s.as_str().to_string()));
            }
        }

        if clauses.is_empty() {
            clauses.push("1=1".to_string());
        }

        (clauses.join(" AND "), params)
    }
}

/// Statistics from a prune operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneResult {
    /// Number of tasks deleted
    pub deleted_tasks: u64,
    /// Number of task_dependencies rows deleted alongside them
    pub deleted_dependencies: u64,
    /// Bytes reclaimed by VACUUM, when it ran
    pub reclaimed_bytes: Option<u64>,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Count of deleted tasks by status
    pub breakdown_by_status: HashMap<TaskStatus, u64>,
    /// Whether VACUUM was skipped due to the large-table threshold
    pub vacuum_auto_skipped: bool,
}

/// Prune statistics extended with tree-level metrics for recursive runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecursivePruneResult {
    pub deleted_tasks: u64,
    pub deleted_dependencies: u64,
    pub reclaimed_bytes: Option<u64>,
    pub dry_run: bool,
    pub breakdown_by_status: HashMap<TaskStatus, u64>,
    pub vacuum_auto_skipped: bool,
    /// Maximum depth among deleted trees
    pub tree_depth: u32,
    /// Count of tasks deleted at each depth level
    pub deleted_by_depth: HashMap<u32, u64>,
    /// Number of complete task trees deleted
    pub trees_deleted: u64,
    /// Number of trees preserved because a descendant did not match
    pub partial_trees: u64,
}

/// Runtime node used during tree traversal (not persisted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub status: TaskStatus,
    /// Depth in the tree, 0 for the traversal root
    pub depth: u32,
    pub children_ids: Vec<Uuid>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children_ids.is_empty()
    }

    pub fn matches_status(&self, allowed: &[TaskStatus]) -> bool {
        allowed.contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_require_a_criterion() {
        let result = PruneFilters::default().validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_filters_reject_non_terminal_statuses() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Blocked,
            TaskStatus::Ready,
            TaskStatus::Running,
        ] {
            let filters = PruneFilters {
                statuses: Some(vec![status]),
                ..Default::default()
            };
            assert!(filters.validate().is_err(), "{status} must be rejected");
        }
    }

    #[test]
    fn test_time_filter_defaults_to_terminal_statuses() {
        let filters = PruneFilters {
            older_than_days: Some(30),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(filters.statuses, Some(PRUNEABLE_STATUSES.to_vec()));
    }

    #[test]
    fn test_where_clause_combines_criteria() {
        let id = Uuid::new_v4();
        let filters = PruneFilters {
            task_ids: Some(vec![id]),
            statuses: Some(vec![TaskStatus::Completed, TaskStatus::Failed]),
            ..Default::default()
        }
        .validate()
        .unwrap();

        let (sql, params) = filters.build_where_clause();
        assert!(sql.contains("id IN (?)"));
        assert!(sql.contains("status IN (?,?)"));
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], id.to_string());
        assert_eq!(params[1], "completed");
    }

    #[test]
    fn test_where_clause_older_than() {
        let filters = PruneFilters {
            older_than_days: Some(7),
            ..Default::default()
        }
        .validate()
        .unwrap();

        let (sql, params) = filters.build_where_clause();
        assert!(sql.contains("completed_at < datetime('now', ?)"));
        assert!(params.contains(&"-7 days".to_string()));
    }

    #[test]
    fn test_vacuum_mode_parsing() {
        assert_eq!("always".parse::<VacuumMode>().unwrap(), VacuumMode::Always);
        assert_eq!(
            "conditional".parse::<VacuumMode>().unwrap(),
            VacuumMode::Conditional
        );
        assert!("sometimes".parse::<VacuumMode>().is_err());
    }
}
