//! Swarm orchestrator: bounded-concurrency task dispatch.
//!
//! A single cooperative dispatch loop polls the queue for READY tasks
//! and spawns workers under a semaphore. Workers report success or
//! failure back to the queue service and always deregister themselves.
//! `shutdown` is idempotent: the loop exits within one poll interval and
//! in-flight workers run to completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::agent_executor::AgentExecutor;
use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskResult};
use crate::services::TaskQueueService;

/// Snapshot of the swarm's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmStatus {
    pub max_concurrent_agents: usize,
    pub active_agents: usize,
    pub available_slots: usize,
    pub total_results: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Orchestrates concurrent execution of multiple agents in a swarm.
pub struct SwarmOrchestrator {
    task_queue_service: Arc<TaskQueueService>,
    agent_executor: Arc<dyn AgentExecutor>,
    max_concurrent_agents: usize,
    poll_interval: Duration,
    semaphore: Arc<Semaphore>,
    active_agents: RwLock<HashMap<Uuid, Task>>,
    results: RwLock<Vec<TaskResult>>,
    shutdown_flag: AtomicBool,
}

impl SwarmOrchestrator {
    pub fn new(
        task_queue_service: Arc<TaskQueueService>,
        agent_executor: Arc<dyn AgentExecutor>,
        max_concurrent_agents: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            task_queue_service,
            agent_executor,
            max_concurrent_agents,
            poll_interval,
            semaphore: Arc::new(Semaphore::new(max_concurrent_agents)),
            active_agents: RwLock::new(HashMap::new()),
            results: RwLock::new(Vec::new()),
            shutdown_flag: AtomicBool::new(false),
        }
    }

    /// Run the dispatch loop until `task_limit` tasks have been spawned,
    /// the queue stays empty past shutdown, or `shutdown` is called.
    ///
    /// The spawn counter increments BEFORE the worker launches: counting
    /// at spawn time prevents racing multiple spawns past the limit when
    /// tasks start faster than they finish. With `task_limit = Some(0)`
    /// the loop exits immediately.
    ///
    /// Returns every execution result accumulated during the run.
    #[instrument(skip(self), fields(max_concurrent = self.max_concurrent_agents))]
    pub async fn start_swarm(
        self: &Arc<Self>,
        task_limit: Option<usize>,
    ) -> DomainResult<Vec<TaskResult>> {
        self.shutdown_flag.store(false, Ordering::SeqCst);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            ?task_limit,
            "starting swarm"
        );

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut tasks_spawned: usize = 0;

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            if let Some(limit) = task_limit {
                if tasks_spawned >= limit {
                    info!(limit, tasks_spawned, "task limit reached");
                    break;
                }
            }

            let active_count = self.active_agents.read().await.len();
            if active_count < self.max_concurrent_agents {
                match self.task_queue_service.get_next_task().await {
                    Ok(Some(task)) => {
                        // Spawn-time counting: increment before launching
                        tasks_spawned += 1;

                        info!(
                            task_id = %task.id,
                            active_count,
                            "claimed task for execution"
                        );

                        let this = Arc::clone(self);
                        workers.push(tokio::spawn(async move {
                            this.execute_with_semaphore(task).await;
                        }));

                        workers.retain(|w| !w.is_finished());

                        if let Some(limit) = task_limit {
                            if tasks_spawned >= limit {
                                debug!(limit, "task limit reached after spawn");
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(active_count, "no ready tasks, polling");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to fetch next ready task");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            } else {
                debug!(active_count, "at capacity, waiting");
                tokio::time::sleep(self.poll_interval).await;
            }

            workers.retain(|w| !w.is_finished());
        }

        info!(workers = workers.len(), "waiting for in-flight workers");
        for join_result in futures::future::join_all(workers).await {
            if let Err(e) = join_result {
                warn!(error = %e, "worker join failed");
            }
        }

        let results = self.results.read().await.clone();
        info!(tasks_spawned, results = results.len(), "swarm stopped");
        Ok(results)
    }

    /// Execute a batch: the tasks must already be queued; the swarm stops
    /// after that many spawns.
    pub async fn execute_batch(
        self: &Arc<Self>,
        task_count: usize,
    ) -> DomainResult<Vec<TaskResult>> {
        self.start_swarm(Some(task_count)).await
    }

    /// Per-task worker. Bounded by the semaphore; registers itself in the
    /// active set, reports the outcome to the queue service, and always
    /// deregisters.
    async fn execute_with_semaphore(&self, task: Task) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            // Semaphore closed mid-shutdown
            return;
        };

        let task_id = task.id;
        self.active_agents.write().await.insert(task_id, task.clone());

        let timeout = Duration::from_secs(u64::from(task.max_execution_timeout_seconds));
        let result = match tokio::time::timeout(timeout, self.agent_executor.execute_task(&task))
            .await
        {
            Ok(Ok(result)) => {
                if result.success {
                    if let Err(e) = self.task_queue_service.complete_task(task_id, None).await {
                        error!(task_id = %task_id, error = %e, "failed to record completion");
                    }
                } else {
                    let message = result.error.clone().unwrap_or_else(|| "Unknown error".into());
                    error!(task_id = %task_id, error = %message, "task failed in swarm");
                    if let Err(e) = self.task_queue_service.fail_task(task_id, &message).await {
                        error!(task_id = %task_id, error = %e, "failed to record failure");
                    }
                }
                result
            }
            Ok(Err(e)) => {
                let message = format!("ExecutionError: {e}");
                error!(task_id = %task_id, error = %message, "agent execution raised");
                if let Err(e) = self.task_queue_service.fail_task(task_id, &message).await {
                    error!(task_id = %task_id, error = %e, "failed to record failure");
                }
                TaskResult::failure(task_id, Uuid::nil(), message)
            }
            Err(_) => {
                let message = format!(
                    "TimeoutError: execution exceeded {} seconds",
                    task.max_execution_timeout_seconds
                );
                error!(task_id = %task_id, "agent execution timed out");
                if let Err(e) = self.task_queue_service.fail_task(task_id, &message).await {
                    error!(task_id = %task_id, error = %e, "failed to record timeout");
                }
                TaskResult::failure(task_id, Uuid::nil(), message)
            }
        };

        self.results.write().await.push(result);
        self.active_agents.write().await.remove(&task_id);
    }

    /// Current swarm status snapshot.
    pub async fn get_swarm_status(&self) -> SwarmStatus {
        let active = self.active_agents.read().await.len();
        let results = self.results.read().await;
        let success_count = results.iter().filter(|r| r.success).count();

        SwarmStatus {
            max_concurrent_agents: self.max_concurrent_agents,
            active_agents: active,
            available_slots: self.max_concurrent_agents.saturating_sub(active),
            total_results: results.len(),
            success_count,
            failure_count: results.len() - success_count,
        }
    }

    /// Signal the dispatch loop to exit. Idempotent; in-flight workers
    /// run to completion and are awaited by `start_swarm`.
    pub async fn shutdown(&self) {
        let active = self.active_agents.read().await.len();
        if active > 0 {
            warn!(active, "shutdown requested with active agents");
        }
        self.shutdown_flag.store(true, Ordering::SeqCst);
        info!("swarm shutdown signalled");
    }

    /// Clear accumulated state. Test-only.
    pub async fn reset(&self) {
        self.active_agents.write().await.clear();
        self.results.write().await.clear();
        self.shutdown_flag.store(false, Ordering::SeqCst);
        debug!("swarm state reset");
    }
}
