//! Dynamic task priority scoring.
//!
//! Weighted multi-factor formula, every factor normalized to [0, 100]:
//!
//! | factor   | weight | definition                                   |
//! |----------|-------:|----------------------------------------------|
//! | base     |   0.30 | user priority * 10                           |
//! | depth    |   0.25 | min(100, dependency depth * 10)              |
//! | urgency  |   0.25 | deadline proximity curve                     |
//! | blocking |   0.15 | min(100, log10(blocked + 1) * 33.33)         |
//! | source   |   0.05 | human 100 / requirements 75 / planner 50 / 25 |
//!
//! A failing sub-factor is logged and substituted with a neutral value
//! (0 for boost factors, 50 for urgency); one bad task never poisons a
//! batch recalculation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskSource, TaskStatus};
use crate::infrastructure::database::TaskRepo;
use crate::services::dependency_resolver::DependencyResolver;

/// Factor weights. Must sum to 1.0 within 1e-6.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub base: f64,
    pub depth: f64,
    pub urgency: f64,
    pub blocking: f64,
    pub source: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            base: 0.30,
            depth: 0.25,
            urgency: 0.25,
            blocking: 0.15,
            source: 0.05,
        }
    }
}

impl PriorityWeights {
    pub fn validate(&self) -> DomainResult<()> {
        let total = self.base + self.depth + self.urgency + self.blocking + self.source;
        if (total - 1.0).abs() > 1e-6 {
            return Err(DomainError::ValidationFailed(format!(
                "Weights must sum to 1.0, got {total:.6}. Weights: base={}, depth={}, \
                 urgency={}, blocking={}, source={}",
                self.base, self.depth, self.urgency, self.blocking, self.source
            )));
        }
        Ok(())
    }
}

/// Calculates dynamic task priorities.
pub struct PriorityCalculator {
    repo: Arc<TaskRepo>,
    resolver: Arc<DependencyResolver>,
    weights: PriorityWeights,
}

impl PriorityCalculator {
    pub fn new(repo: Arc<TaskRepo>, resolver: Arc<DependencyResolver>) -> Self {
        Self {
            repo,
            resolver,
            weights: PriorityWeights::default(),
        }
    }

    /// Construct with custom weights; fails unless they sum to 1.0.
    pub fn with_weights(
        repo: Arc<TaskRepo>,
        resolver: Arc<DependencyResolver>,
        weights: PriorityWeights,
    ) -> DomainResult<Self> {
        weights.validate()?;
        Ok(Self {
            repo,
            resolver,
            weights,
        })
    }

    /// Calculate the priority score (0-100) for a task, fetching depth
    /// and blocking impact through the dependency resolver.
    pub async fn calculate_priority(&self, task: &Task) -> f64 {
        let depth = match self.resolver.calculate_dependency_depth(task.id).await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "depth score failed, using 0");
                0
            }
        };

        let blocked_count = match self.resolver.get_blocked_tasks(task.id).await {
            Ok(blocked) => blocked.len(),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "blocking score failed, using 0");
                0
            }
        };

        self.calculate_with(task, depth, blocked_count)
    }

    /// Pure scoring path with explicit depth and blocked-count inputs.
    ///
    /// Used at enqueue time (the task is not yet in the graph) and by the
    /// benchmarks.
    pub fn calculate_with(&self, task: &Task, depth: u32, blocked_count: usize) -> f64 {
        let factors = ScoreFactors {
            base: f64::from(task.priority) * 10.0,
            depth: depth_score(depth),
            urgency: urgency_score(
                task.deadline,
                task.estimated_duration_seconds,
                Utc::now(),
            ),
            blocking: blocking_score(blocked_count),
            source: source_score(task.source),
        };

        let score = factors.weighted(&self.weights);
        debug!(
            task_id = %task.id,
            score,
            base = factors.base,
            depth = factors.depth,
            urgency = factors.urgency,
            blocking = factors.blocking,
            source = factors.source,
            "priority calculated"
        );
        score
    }

    /// Batch recalculation after a state change.
    ///
    /// Only PENDING, BLOCKED, and READY tasks are touched; anything else
    /// is skipped with a debug log. Returns the id -> new priority map
    /// for the tasks actually recalculated. Per-task failures are logged
    /// and skipped.
    pub async fn recalculate_priorities(
        &self,
        affected_task_ids: &[Uuid],
    ) -> DomainResult<HashMap<Uuid, f64>> {
        let mut results = HashMap::new();

        for task_id in affected_task_ids {
            let task = match self.repo.get(*task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    warn!(task_id = %task_id, "task not found during priority recalculation");
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "failed to fetch task for recalculation");
                    continue;
                }
            };

            if !matches!(
                task.status,
                TaskStatus::Pending | TaskStatus::Blocked | TaskStatus::Ready
            ) {
                debug!(task_id = %task_id, status = %task.status, "skipping priority recalculation");
                continue;
            }

            let new_priority = self.calculate_priority(&task).await;
            if let Err(e) = self
                .repo
                .update_calculated_priority(*task_id, new_priority)
                .await
            {
                warn!(task_id = %task_id, error = %e, "failed to persist recalculated priority");
                continue;
            }
            results.insert(*task_id, new_priority);
        }

        debug!(
            recalculated = results.len(),
            requested = affected_task_ids.len(),
            "priority recalculation finished"
        );
        Ok(results)
    }
}

/// The five normalized factors.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFactors {
    pub base: f64,
    pub depth: f64,
    pub urgency: f64,
    pub blocking: f64,
    pub source: f64,
}

impl ScoreFactors {
    pub fn weighted(&self, weights: &PriorityWeights) -> f64 {
        let score = self.base * weights.base
            + self.depth * weights.depth
            + self.urgency * weights.urgency
            + self.blocking * weights.blocking
            + self.source * weights.source;
        score.clamp(0.0, 100.0)
    }
}

/// Linear depth scaling: 10 points per level, capped at 100.
pub fn depth_score(depth: u32) -> f64 {
    (f64::from(depth) * 10.0).min(100.0)
}

/// Logarithmic blocking impact: min(100, log10(n + 1) * 33.33).
pub fn blocking_score(blocked_count: usize) -> f64 {
    if blocked_count == 0 {
        return 0.0;
    }
    ((blocked_count as f64 + 1.0).log10() * 33.33).min(100.0)
}

/// Deadline urgency curve.
///
/// - no deadline: 50 (neutral)
/// - past deadline, or not enough time left to finish: 100
/// - with an estimate: 100 * exp(-time_remaining / (2 * estimate))
/// - without one: step thresholds at 1 minute / 1 hour / 1 day / 1 week
pub fn urgency_score(
    deadline: Option<DateTime<Utc>>,
    estimated_duration_seconds: Option<u32>,
    now: DateTime<Utc>,
) -> f64 {
    let Some(deadline) = deadline else {
        return 50.0;
    };

    let time_remaining = (deadline - now).num_seconds();
    if time_remaining <= 0 {
        return 100.0;
    }

    if let Some(estimate) = estimated_duration_seconds {
        let estimate = f64::from(estimate);
        let remaining = time_remaining as f64;
        if remaining < estimate {
            return 100.0;
        }
        let decay = remaining / (estimate * 2.0);
        return (100.0 * (-decay).exp()).clamp(0.0, 100.0);
    }

    match time_remaining {
        t if t < 60 => 100.0,
        t if t < 3_600 => 80.0,
        t if t < 86_400 => 50.0,
        t if t < 604_800 => 30.0,
        _ => 10.0,
    }
}

/// Source ladder: human work outranks agent work.
pub fn source_score(source: TaskSource) -> f64 {
    match source {
        TaskSource::Human => 100.0,
        TaskSource::AgentRequirements => 75.0,
        TaskSource::AgentPlanner => 50.0,
        TaskSource::AgentImplementation => 25.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_weights_sum_to_one() {
        PriorityWeights::default().validate().unwrap();
    }

    #[test]
    fn test_bad_weights_rejected() {
        let weights = PriorityWeights {
            base: 0.5,
            depth: 0.5,
            urgency: 0.5,
            blocking: 0.0,
            source: 0.0,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_depth_score_caps_at_100() {
        assert!((depth_score(0) - 0.0).abs() < f64::EPSILON);
        assert!((depth_score(3) - 30.0).abs() < f64::EPSILON);
        assert!((depth_score(10) - 100.0).abs() < f64::EPSILON);
        assert!((depth_score(50) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_blocking_score_curve() {
        assert!((blocking_score(0) - 0.0).abs() < f64::EPSILON);
        // 1 blocked: log10(2) * 33.33 ≈ 10
        assert!((blocking_score(1) - 10.033).abs() < 0.1);
        // 1000 blocked: log10(1001) * 33.33 ≈ 100
        assert!(blocking_score(1000) > 99.0);
        assert!(blocking_score(1_000_000) <= 100.0);
    }

    #[test]
    fn test_urgency_no_deadline_is_neutral() {
        assert!((urgency_score(None, None, Utc::now()) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_urgency_past_deadline_is_max() {
        let now = Utc::now();
        let score = urgency_score(Some(now - Duration::hours(1)), None, now);
        assert!((score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_urgency_insufficient_time_is_max() {
        let now = Utc::now();
        // 30 minutes remain, estimated duration one hour
        let score = urgency_score(Some(now + Duration::minutes(30)), Some(3600), now);
        assert!((score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_urgency_exponential_decay_with_estimate() {
        let now = Utc::now();
        // 2 hours remain, estimate one hour: 100 * exp(-1) ≈ 36.8
        let score = urgency_score(Some(now + Duration::hours(2)), Some(3600), now);
        assert!((score - 36.79).abs() < 0.5, "got {score}");
    }

    #[test]
    fn test_urgency_step_thresholds() {
        let now = Utc::now();
        let score = |remaining: Duration| urgency_score(Some(now + remaining), None, now);

        assert!((score(Duration::seconds(30)) - 100.0).abs() < f64::EPSILON);
        assert!((score(Duration::minutes(30)) - 80.0).abs() < f64::EPSILON);
        assert!((score(Duration::hours(10)) - 50.0).abs() < f64::EPSILON);
        assert!((score(Duration::days(3)) - 30.0).abs() < f64::EPSILON);
        assert!((score(Duration::days(30)) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_source_ladder() {
        assert!((source_score(TaskSource::Human) - 100.0).abs() < f64::EPSILON);
        assert!((source_score(TaskSource::AgentRequirements) - 75.0).abs() < f64::EPSILON);
        assert!((source_score(TaskSource::AgentPlanner) - 50.0).abs() < f64::EPSILON);
        assert!((source_score(TaskSource::AgentImplementation) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_source_factor_separates_equal_tasks() {
        // Identical tasks except source: the human one must win by
        // exactly (100 - 25) * 0.05 = 3.75 points.
        let weights = PriorityWeights::default();
        let human = ScoreFactors {
            base: 30.0,
            depth: 0.0,
            urgency: 50.0,
            blocking: 0.0,
            source: source_score(TaskSource::Human),
        };
        let agent = ScoreFactors {
            source: source_score(TaskSource::AgentImplementation),
            ..human
        };

        let diff = human.weighted(&weights) - agent.weighted(&weights);
        assert!((diff - 3.75).abs() < 1e-9, "got {diff}");
    }

    #[test]
    fn test_score_clamped_to_range() {
        let weights = PriorityWeights::default();
        let max = ScoreFactors {
            base: 100.0,
            depth: 100.0,
            urgency: 100.0,
            blocking: 100.0,
            source: 100.0,
        };
        assert!(max.weighted(&weights) <= 100.0);

        let min = ScoreFactors {
            base: 0.0,
            depth: 0.0,
            urgency: 0.0,
            blocking: 0.0,
            source: 0.0,
        };
        assert!(min.weighted(&weights) >= 0.0);
    }
}
