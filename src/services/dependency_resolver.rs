//! Dependency resolution service for the task queue.
//!
//! Graph algorithms over the `task_dependencies` table: cycle detection
//! (DFS with recursion-stack tracking), topological ordering (Kahn),
//! memoized depth calculation, and unblocking queries. The adjacency list
//! is cached with a TTL; every dependency mutation must call
//! [`DependencyResolver::invalidate_cache`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskStatus;
use crate::infrastructure::database::TaskRepo;

/// Cached graph state. `graph` maps prerequisite -> dependents over
/// unresolved edges only; `reverse` maps dependent -> prerequisites.
struct ResolverCache {
    graph: HashMap<Uuid, HashSet<Uuid>>,
    reverse: HashMap<Uuid, HashSet<Uuid>>,
    built_at: Instant,
}

/// Handles dependency graph operations and validation.
pub struct DependencyResolver {
    repo: Arc<TaskRepo>,
    cache_ttl: Duration,
    cache: Mutex<Option<ResolverCache>>,
    depth_memo: Mutex<HashMap<Uuid, u32>>,
}

impl DependencyResolver {
    /// Default TTL for the adjacency cache.
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

    pub fn new(repo: Arc<TaskRepo>) -> Self {
        Self::with_cache_ttl(repo, Self::DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(repo: Arc<TaskRepo>, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache_ttl,
            cache: Mutex::new(None),
            depth_memo: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether adding `new_dependencies` edges onto `task_id` would
    /// create any cycle, simulating the insertion over the current graph.
    ///
    /// Returns `Ok(())` when acyclic; fails with
    /// [`DomainError::CircularDependency`] listing every cycle path.
    /// A self-dependency is an immediate error.
    pub async fn detect_circular_dependencies(
        &self,
        new_dependencies: &[Uuid],
        task_id: Option<Uuid>,
    ) -> DomainResult<()> {
        let (mut graph, _) = self.build_dependency_graph().await?;

        if let Some(task_id) = task_id {
            graph.entry(task_id).or_default();
            for prereq_id in new_dependencies {
                if *prereq_id == task_id {
                    return Err(DomainError::ValidationFailed(format!(
                        "Self-dependency not allowed: task {task_id} cannot depend on itself"
                    )));
                }
                graph.entry(*prereq_id).or_default().insert(task_id);
            }
        }

        let cycles = find_cycles(&graph);
        if cycles.is_empty() {
            Ok(())
        } else {
            Err(DomainError::CircularDependency { cycles })
        }
    }

    /// Maximum depth from a root of the DAG.
    ///
    /// 0 when the task has no unresolved prerequisites, else one more
    /// than the deepest unresolved prerequisite. Memoized per resolver
    /// instance; the memo is dropped on cache invalidation.
    pub async fn calculate_dependency_depth(&self, task_id: Uuid) -> DomainResult<u32> {
        {
            let memo = self.depth_memo.lock().await;
            if let Some(depth) = memo.get(&task_id) {
                return Ok(*depth);
            }
        }

        let (_, reverse) = self.build_dependency_graph().await?;

        let mut memo = self.depth_memo.lock().await;
        let depth = depth_of(task_id, &reverse, &mut memo, &mut HashSet::new())?;
        Ok(depth)
    }

    /// Topological sort of the given tasks using Kahn's algorithm over
    /// unresolved edges, restricted to the given set.
    ///
    /// Fails with a cycle error when any node cannot be ordered.
    pub async fn get_execution_order(&self, task_ids: &[Uuid]) -> DomainResult<Vec<Uuid>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_set: HashSet<Uuid> = task_ids.iter().copied().collect();
        let mut graph: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        let mut in_degree: HashMap<Uuid, usize> = task_ids.iter().map(|id| (*id, 0)).collect();

        for task_id in task_ids {
            let dependencies = self.repo.get_task_dependencies(*task_id).await?;
            for dep in dependencies {
                if dep.resolved_at.is_none() && id_set.contains(&dep.prerequisite_task_id) {
                    let inserted = graph
                        .entry(dep.prerequisite_task_id)
                        .or_default()
                        .insert(dep.dependent_task_id);
                    if inserted {
                        *in_degree.entry(dep.dependent_task_id).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<Uuid> = task_ids
            .iter()
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .copied()
            .collect();
        let mut result = Vec::new();

        while let Some(node) = queue.pop_front() {
            result.push(node);
            if let Some(dependents) = graph.get(&node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if result.len() != task_ids.len() {
            let processed: HashSet<Uuid> = result.iter().copied().collect();
            let mut unprocessed: Vec<Uuid> = id_set.difference(&processed).copied().collect();
            unprocessed.sort();
            return Err(DomainError::CircularDependency {
                cycles: vec![unprocessed],
            });
        }

        Ok(result)
    }

    /// Non-throwing predicate: would adding the edge create a cycle?
    pub async fn validate_new_dependency(
        &self,
        task_id: Uuid,
        depends_on_task_id: Uuid,
    ) -> bool {
        self.detect_circular_dependencies(&[depends_on_task_id], Some(task_id))
            .await
            .is_ok()
    }

    /// True iff no unresolved edge points at the task.
    pub async fn are_all_dependencies_met(&self, task_id: Uuid) -> DomainResult<bool> {
        let unmet = self.repo.count_unresolved_dependencies(task_id).await?;
        Ok(unmet == 0)
    }

    /// Dependents still awaiting a prerequisite.
    pub async fn get_blocked_tasks(&self, prerequisite_task_id: Uuid) -> DomainResult<Vec<Uuid>> {
        Ok(self
            .repo
            .get_blocked_dependent_ids(prerequisite_task_id)
            .await?)
    }

    /// Of the given tasks, those not yet completed or cancelled.
    pub async fn get_unmet_dependencies(
        &self,
        dependency_ids: &[Uuid],
    ) -> DomainResult<Vec<Uuid>> {
        let mut unmet = Vec::new();
        for id in dependency_ids {
            match self.repo.get(*id).await? {
                Some(task)
                    if matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled) => {}
                Some(_) => unmet.push(*id),
                None => unmet.push(*id),
            }
        }
        Ok(unmet)
    }

    /// Ancestor chain grouped by depth level: index 0 holds the task
    /// itself, index i its unresolved ancestors at distance i.
    pub async fn get_dependency_chain(&self, task_id: Uuid) -> DomainResult<Vec<Vec<Uuid>>> {
        let (_, reverse) = self.build_dependency_graph().await?;

        let mut visited = HashSet::new();
        let mut levels: Vec<Vec<Uuid>> = Vec::new();
        let mut frontier = vec![task_id];
        visited.insert(task_id);

        while !frontier.is_empty() {
            levels.push(frontier.clone());
            let mut next = Vec::new();
            for id in &frontier {
                if let Some(prereqs) = reverse.get(id) {
                    for prereq in prereqs {
                        if visited.insert(*prereq) {
                            next.push(*prereq);
                        }
                    }
                }
            }
            frontier = next;
        }

        Ok(levels)
    }

    /// Drop the adjacency cache and depth memo. Must be called after
    /// every mutation touching `task_dependencies`.
    pub async fn invalidate_cache(&self) {
        *self.cache.lock().await = None;
        self.depth_memo.lock().await.clear();
        debug!("dependency graph cache invalidated");
    }

    /// Adjacency lists over unresolved edges, rebuilt when the TTL lapses.
    async fn build_dependency_graph(
        &self,
    ) -> DomainResult<(HashMap<Uuid, HashSet<Uuid>>, HashMap<Uuid, HashSet<Uuid>>)> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.built_at.elapsed() < self.cache_ttl {
                    debug!("dependency graph cache hit");
                    return Ok((cached.graph.clone(), cached.reverse.clone()));
                }
            }
        }

        debug!("dependency graph cache miss, rebuilding");
        let edges = self.repo.get_unresolved_edges().await?;

        let mut graph: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        let mut reverse: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for (dependent, prerequisite) in edges {
            graph.entry(prerequisite).or_default().insert(dependent);
            graph.entry(dependent).or_default();
            reverse.entry(dependent).or_default().insert(prerequisite);
            reverse.entry(prerequisite).or_default();
        }

        let mut cache = self.cache.lock().await;
        *cache = Some(ResolverCache {
            graph: graph.clone(),
            reverse: reverse.clone(),
            built_at: Instant::now(),
        });

        Ok((graph, reverse))
    }
}

/// DFS cycle collection with recursion-stack tracking. O(V + E).
fn find_cycles(graph: &HashMap<Uuid, HashSet<Uuid>>) -> Vec<Vec<Uuid>> {
    fn dfs(
        node: Uuid,
        graph: &HashMap<Uuid, HashSet<Uuid>>,
        visited: &mut HashSet<Uuid>,
        rec_stack: &mut HashSet<Uuid>,
        path: &mut Vec<Uuid>,
        cycles: &mut Vec<Vec<Uuid>>,
    ) {
        if rec_stack.contains(&node) {
            if let Some(start) = path.iter().position(|id| *id == node) {
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                cycles.push(cycle);
            }
            return;
        }
        if visited.contains(&node) {
            return;
        }

        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(neighbors) = graph.get(&node) {
            let mut sorted: Vec<Uuid> = neighbors.iter().copied().collect();
            sorted.sort();
            for neighbor in sorted {
                dfs(neighbor, graph, visited, rec_stack, path, cycles);
            }
        }

        path.pop();
        rec_stack.remove(&node);
    }

    let mut visited = HashSet::new();
    let mut cycles = Vec::new();
    let mut keys: Vec<Uuid> = graph.keys().copied().collect();
    keys.sort();
    for node in keys {
        if !visited.contains(&node) {
            dfs(
                node,
                graph,
                &mut visited,
                &mut HashSet::new(),
                &mut Vec::new(),
                &mut cycles,
            );
        }
    }
    cycles
}

/// Memoized depth over the dependent -> prerequisites map.
fn depth_of(
    task_id: Uuid,
    reverse: &HashMap<Uuid, HashSet<Uuid>>,
    memo: &mut HashMap<Uuid, u32>,
    in_progress: &mut HashSet<Uuid>,
) -> DomainResult<u32> {
    if let Some(depth) = memo.get(&task_id) {
        return Ok(*depth);
    }
    if !in_progress.insert(task_id) {
        return Err(DomainError::cycle(vec![task_id]));
    }

    let depth = match reverse.get(&task_id) {
        None => 0,
        Some(prereqs) if prereqs.is_empty() => 0,
        Some(prereqs) => {
            let mut max_depth = 0;
            for prereq in prereqs {
                max_depth = max_depth.max(depth_of(*prereq, reverse, memo, in_progress)?);
            }
            max_depth + 1
        }
    };

    in_progress.remove(&task_id);
    memo.insert(task_id, depth);
    Ok(depth)
}
