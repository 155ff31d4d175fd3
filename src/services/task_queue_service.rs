//! Task queue service.
//!
//! Coordinates submission, dependency validation, priority calculation,
//! dispatch, and the completion/failure lifecycle. All multi-row
//! mutations run inside repository transactions; the resolver cache is
//! invalidated after every dependency mutation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::parse_duration;
use crate::domain::models::{QueueConfig, Task, TaskDependency, TaskStatus};
use crate::infrastructure::database::{TaskFilters, TaskRepo};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::priority_calculator::PriorityCalculator;

/// Service for managing task queue operations.
pub struct TaskQueueService {
    repo: Arc<TaskRepo>,
    resolver: Arc<DependencyResolver>,
    priority_calc: Arc<PriorityCalculator>,
    queue_config: QueueConfig,
}

impl TaskQueueService {
    pub fn new(
        repo: Arc<TaskRepo>,
        resolver: Arc<DependencyResolver>,
        priority_calc: Arc<PriorityCalculator>,
    ) -> Self {
        Self::with_config(repo, resolver, priority_calc, QueueConfig::default())
    }

    pub fn with_config(
        repo: Arc<TaskRepo>,
        resolver: Arc<DependencyResolver>,
        priority_calc: Arc<PriorityCalculator>,
        queue_config: QueueConfig,
    ) -> Self {
        Self {
            repo,
            resolver,
            priority_calc,
            queue_config,
        }
    }

    /// Submit a task to the queue.
    ///
    /// Validates the task and its prerequisites, rejects any edge that
    /// would form a cycle (leaving the store untouched), computes
    /// dependency depth and calculated priority, and writes the task and
    /// its edges in a single transaction. The task lands READY when every
    /// prerequisite is already resolved, BLOCKED otherwise.
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    pub async fn enqueue_task(&self, mut task: Task) -> DomainResult<Task> {
        task.validate()?;

        let mut edges = Vec::new();

        if task.dependencies.is_empty() {
            task.status = TaskStatus::Ready;
            task.dependency_depth = 0;
        } else {
            // Every prerequisite must exist
            let mut prereq_tasks = Vec::with_capacity(task.dependencies.len());
            for prereq_id in &task.dependencies {
                let prereq = self
                    .repo
                    .get(*prereq_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::ValidationFailed(format!(
                            "Dependency task {prereq_id} not found"
                        ))
                    })?;
                prereq_tasks.push(prereq);
            }

            // Simulated insertion; a cycle aborts before anything is written
            self.resolver
                .detect_circular_dependencies(&task.dependencies, Some(task.id))
                .await?;

            let now = Utc::now();
            let mut max_unresolved_depth: Option<u32> = None;
            for prereq in &prereq_tasks {
                let mut edge = TaskDependency::new(task.id, prereq.id)
                    .with_type(task.dependency_type);
                if prereq.status == TaskStatus::Completed {
                    edge.resolved_at = Some(now);
                } else {
                    let depth = self.resolver.calculate_dependency_depth(prereq.id).await?;
                    max_unresolved_depth =
                        Some(max_unresolved_depth.map_or(depth, |d| d.max(depth)));
                }
                edges.push(edge);
            }

            match max_unresolved_depth {
                Some(depth) => {
                    task.status = TaskStatus::Blocked;
                    task.dependency_depth = depth + 1;
                }
                None => {
                    task.status = TaskStatus::Ready;
                    task.dependency_depth = 0;
                }
            }
        }

        task.calculated_priority =
            self.priority_calc
                .calculate_with(&task, task.dependency_depth, 0);
        task.last_updated_at = Utc::now();

        self.repo.insert_with_dependencies(&task, &edges).await?;
        self.resolver.invalidate_cache().await;

        info!(
            task_id = %task.id,
            status = %task.status,
            depth = task.dependency_depth,
            priority = task.calculated_priority,
            "task enqueued"
        );

        Ok(task)
    }

    /// Claim the highest-priority READY task, atomically flipping it to
    /// RUNNING with `started_at` stamped. None when the queue is drained.
    #[instrument(skip(self), err)]
    pub async fn get_next_task(&self) -> DomainResult<Option<Task>> {
        Ok(self.repo.claim_next_ready_task().await?)
    }

    /// Complete a RUNNING task.
    ///
    /// In a single transaction: the status flips to COMPLETED, every
    /// outgoing edge resolves, dependents whose last prerequisite this
    /// was flip BLOCKED -> READY, and an audit row is appended. The
    /// resolver cache is then invalidated and priorities are
    /// recalculated for the affected downstream tasks. Returns the ids
    /// of the newly-READY dependents.
    #[instrument(skip(self), err)]
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        result_data: Option<serde_json::Value>,
    ) -> DomainResult<Vec<Uuid>> {
        let (dependents, newly_ready) = self
            .repo
            .complete_task_transaction(task_id, result_data.as_ref())
            .await?;

        self.resolver.invalidate_cache().await;

        if !dependents.is_empty() {
            let affected = self.downstream_closure(&dependents).await?;
            self.priority_calc.recalculate_priorities(&affected).await?;
        }

        info!(
            task_id = %task_id,
            unblocked = newly_ready.len(),
            "task completed"
        );
        Ok(newly_ready)
    }

    /// Record a task failure.
    ///
    /// With retry budget remaining the task returns to READY after an
    /// exponential backoff delay is computed (and recorded on the audit
    /// trail); otherwise it lands in FAILED. Dependents stay BLOCKED
    /// either way: outgoing edges are never resolved by failure.
    #[instrument(skip(self), err)]
    pub async fn fail_task(&self, task_id: Uuid, error_message: &str) -> DomainResult<TaskStatus> {
        let task = self
            .repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        let retry = task.can_retry();
        let delay = self.retry_backoff_delay(task.retry_count);

        self.repo
            .fail_task_transaction(task_id, error_message, retry, delay.as_secs())
            .await?;

        let status = if retry {
            info!(
                task_id = %task_id,
                retry = task.retry_count + 1,
                max_retries = task.max_retries,
                backoff_secs = delay.as_secs(),
                "task failed, requeued for retry"
            );
            TaskStatus::Ready
        } else {
            let blocked = self.resolver.get_blocked_tasks(task_id).await?;
            if !blocked.is_empty() {
                warn!(
                    task_id = %task_id,
                    dependents = blocked.len(),
                    error = error_message,
                    "task failed permanently, dependents remain blocked"
                );
            }
            TaskStatus::Failed
        };

        Ok(status)
    }

    /// Cancel a task. Terminal; dependents remain BLOCKED unless
    /// cancelled explicitly by the caller.
    #[instrument(skip(self), err)]
    pub async fn cancel_task(&self, task_id: Uuid) -> DomainResult<()> {
        self.repo.cancel_task(task_id).await?;
        info!(task_id = %task_id, "task cancelled");
        Ok(())
    }

    pub async fn get(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        Ok(self.repo.get(task_id).await?)
    }

    pub async fn list(&self, filters: TaskFilters) -> DomainResult<Vec<Task>> {
        Ok(self.repo.list(&filters).await?)
    }

    pub async fn count(&self, filters: TaskFilters) -> DomainResult<i64> {
        Ok(self.repo.count(&filters).await?)
    }

    /// Direct children in the parent/child tree, sorted by submission.
    pub async fn get_children(&self, parent_id: Uuid) -> DomainResult<Vec<Task>> {
        Ok(self.repo.get_children(parent_id).await?)
    }

    /// Exponential retry backoff from configuration, capped.
    fn retry_backoff_delay(&self, retry_count: u32) -> Duration {
        let initial = parse_duration(&self.queue_config.retry_backoff_initial)
            .unwrap_or(Duration::from_secs(10));
        let max = parse_duration(&self.queue_config.retry_backoff_max)
            .unwrap_or(Duration::from_secs(300));

        let multiplier = 2u64.saturating_pow(retry_count.min(30));
        let delay = initial.saturating_mul(u32::try_from(multiplier.min(u64::from(u32::MAX))).unwrap_or(u32::MAX));
        delay.min(max)
    }

    /// All tasks reachable downstream of the given ids through
    /// unresolved edges (the given ids included).
    async fn downstream_closure(&self, start: &[Uuid]) -> DomainResult<Vec<Uuid>> {
        let mut seen: HashSet<Uuid> = start.iter().copied().collect();
        let mut frontier: Vec<Uuid> = start.to_vec();

        while let Some(id) = frontier.pop() {
            for dependent in self.resolver.get_blocked_tasks(id).await? {
                if seen.insert(dependent) {
                    frontier.push(dependent);
                }
            }
        }

        Ok(seen.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_backoff(initial: &str, max: &str) -> TaskQueueService {
        // Backoff math needs no live database; the pool is lazy.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy("sqlite::memory:")
            .unwrap();
        let repo = Arc::new(TaskRepo::new(pool));
        let resolver = Arc::new(DependencyResolver::new(repo.clone()));
        let calc = Arc::new(PriorityCalculator::new(repo.clone(), resolver.clone()));
        TaskQueueService::with_config(
            repo,
            resolver,
            calc,
            QueueConfig {
                retry_backoff_initial: initial.to_string(),
                retry_backoff_max: max.to_string(),
                ..QueueConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_backoff_is_exponential_and_capped() {
        let service = service_with_backoff("10s", "5m");

        assert_eq!(service.retry_backoff_delay(0).as_secs(), 10);
        assert_eq!(service.retry_backoff_delay(1).as_secs(), 20);
        assert_eq!(service.retry_backoff_delay(2).as_secs(), 40);
        assert_eq!(service.retry_backoff_delay(3).as_secs(), 80);
        // Beyond the cap
        assert_eq!(service.retry_backoff_delay(6).as_secs(), 300);
        assert_eq!(service.retry_backoff_delay(20).as_secs(), 300);
    }

    #[tokio::test]
    async fn test_backoff_falls_back_on_bad_config() {
        let service = service_with_backoff("nonsense", "also nonsense");
        assert_eq!(service.retry_backoff_delay(0).as_secs(), 10);
        assert_eq!(service.retry_backoff_delay(10).as_secs(), 300);
    }
}
