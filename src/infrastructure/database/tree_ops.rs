//! Tree operations over the task parent/child hierarchy.
//!
//! Traversal uses `WITH RECURSIVE` CTEs bounded by a max-depth safety
//! valve. Recursive prune preserves partial trees: a subtree is deleted
//! only when the root and every descendant match the allowed statuses.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    PruneFilters, PruneResult, RecursivePruneResult, TaskStatus, TreeNode, VacuumMode,
    PRUNEABLE_STATUSES,
};
use crate::infrastructure::database::errors::DatabaseError;
use crate::infrastructure::database::utils::parse_uuid;
use crate::domain::models::prune::VACUUM_SKIP_THRESHOLD;

/// Deletions are chunked so a single statement never carries an unbounded
/// id list.
const DELETE_CHUNK_SIZE: usize = 500;

/// Default traversal depth bound.
pub const DEFAULT_MAX_DEPTH: u32 = 100;

pub struct TreeOperations {
    pool: SqlitePool,
}

impl TreeOperations {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Retrieve the descendant tree of the given roots.
    ///
    /// Fails with a cycle-suspected error if the observed depth reaches
    /// `max_depth`: a legitimate tree bottoms out before the valve.
    pub async fn get_task_tree_with_status(
        &self,
        root_task_ids: &[Uuid],
        filter_statuses: Option<&[TaskStatus]>,
        max_depth: u32,
    ) -> DomainResult<HashMap<Uuid, TreeNode>> {
        if root_task_ids.is_empty() {
            return Err(DomainError::ValidationFailed(
                "root_task_ids cannot be empty".to_string(),
            ));
        }
        if max_depth == 0 || max_depth > 1000 {
            return Err(DomainError::ValidationFailed(
                "max_depth must be between 1 and 1000".to_string(),
            ));
        }

        let root_placeholders = vec!["?"; root_task_ids.len()].join(",");
        let status_filter_sql = match filter_statuses {
            Some(statuses) if !statuses.is_empty() => {
                let placeholders = vec!["?"; statuses.len()].join(",");
                format!("WHERE status IN ({placeholders})")
            }
            _ => String::new(),
        };

        let sql = format!(
            r"
            WITH RECURSIVE task_tree AS (
                SELECT id, parent_task_id, status, 0 AS depth
                FROM tasks
                WHERE id IN ({root_placeholders})

                UNION ALL

                SELECT t.id, t.parent_task_id, t.status, tt.depth + 1 AS depth
                FROM tasks t
                INNER JOIN task_tree tt ON t.parent_task_id = tt.id
                WHERE tt.depth < ?
            )
            SELECT id, parent_task_id, status, depth
            FROM task_tree
            {status_filter_sql}
            ORDER BY depth ASC, id ASC
            "
        );

        let mut query = sqlx::query(&sql);
        for root in root_task_ids {
            query = query.bind(root.to_string());
        }
        query = query.bind(i64::from(max_depth));
        if let Some(statuses) = filter_statuses {
            for status in statuses {
                query = query.bind(status.as_str());
            }
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        let mut max_observed_depth = 0u32;
        let mut nodes: HashMap<Uuid, TreeNode> = HashMap::new();
        let mut ordering: Vec<Uuid> = Vec::new();

        for row in &rows {
            let id = parse_uuid(&row.try_get::<String, _>("id").map_err(DatabaseError::from)?)?;
            let parent_id = row
                .try_get::<Option<String>, _>("parent_task_id")
                .map_err(DatabaseError::from)?
                .as_deref()
                .map(parse_uuid)
                .transpose()?;
            let status: TaskStatus = row
                .try_get::<String, _>("status")
                .map_err(DatabaseError::from)?
                .parse()?;
            let depth = u32::try_from(row.try_get::<i64, _>("depth").map_err(DatabaseError::from)?)
                .unwrap_or(0);
            max_observed_depth = max_observed_depth.max(depth);

            ordering.push(id);
            nodes.insert(
                id,
                TreeNode {
                    id,
                    parent_id,
                    status,
                    depth,
                    children_ids: Vec::new(),
                },
            );
        }

        if !nodes.is_empty() && max_observed_depth >= max_depth {
            return Err(DomainError::ValidationFailed(format!(
                "Tree depth exceeded max_depth={max_depth}. \
                 This may indicate a cycle in parent_task_id relationships."
            )));
        }

        // Second pass links children in traversal order
        for id in ordering {
            let parent_id = nodes.get(&id).and_then(|n| n.parent_id);
            if let Some(parent_id) = parent_id {
                if let Some(parent) = nodes.get_mut(&parent_id) {
                    parent.children_ids.push(id);
                }
            }
        }

        Ok(nodes)
    }

    /// For each root: true iff every descendant (root included) has a
    /// status in `allowed_statuses`.
    pub async fn check_tree_all_match_status(
        &self,
        root_task_ids: &[Uuid],
        allowed_statuses: &[TaskStatus],
    ) -> DomainResult<HashMap<Uuid, bool>> {
        if root_task_ids.is_empty() {
            return Err(DomainError::ValidationFailed(
                "root_task_ids cannot be empty".to_string(),
            ));
        }
        if allowed_statuses.is_empty() {
            return Err(DomainError::ValidationFailed(
                "allowed_statuses cannot be empty".to_string(),
            ));
        }

        let status_placeholders = vec!["?"; allowed_statuses.len()].join(",");
        let mut result = HashMap::new();

        for root in root_task_ids {
            let total: i64 = sqlx::query(
                r"
                WITH RECURSIVE task_tree(id, parent_task_id, status, depth) AS (
                    SELECT id, parent_task_id, status, 0 FROM tasks WHERE id = ?
                    UNION ALL
                    SELECT t.id, t.parent_task_id, t.status, tree.depth + 1
                    FROM tasks t
                    INNER JOIN task_tree tree ON t.parent_task_id = tree.id
                    WHERE tree.depth < 100
                )
                SELECT COUNT(*) FROM task_tree
                ",
            )
            .bind(root.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .try_get(0)
            .map_err(DatabaseError::from)?;

            let sql = format!(
                r"
                WITH RECURSIVE task_tree(id, parent_task_id, status, depth) AS (
                    SELECT id, parent_task_id, status, 0 FROM tasks WHERE id = ?
                    UNION ALL
                    SELECT t.id, t.parent_task_id, t.status, tree.depth + 1
                    FROM tasks t
                    INNER JOIN task_tree tree ON t.parent_task_id = tree.id
                    WHERE tree.depth < 100
                )
                SELECT COUNT(*) FROM task_tree WHERE status IN ({status_placeholders})
                "
            );
            let mut query = sqlx::query(&sql).bind(root.to_string());
            for status in allowed_statuses {
                query = query.bind(status.as_str());
            }
            let matching: i64 = query
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from)?
                .try_get(0)
                .map_err(DatabaseError::from)?;

            result.insert(*root, total > 0 && total == matching);
        }

        Ok(result)
    }

    /// Decide which nodes of a discovered tree may be deleted.
    ///
    /// Partial-tree preservation:
    /// - node matches and all children match: the whole subtree is deletable;
    /// - node does not match but some child subtrees fully match: those
    ///   child subtrees are deletable, the node survives;
    /// - node matches but any child does not: the entire subtree is
    ///   preserved, deletable grandchildren included.
    pub fn validate_tree_deletability(
        tree: &HashMap<Uuid, TreeNode>,
        root_id: Uuid,
        allowed_statuses: &[TaskStatus],
    ) -> HashSet<Uuid> {
        if !tree.contains_key(&root_id) {
            return HashSet::new();
        }

        fn validate_subtree(
            tree: &HashMap<Uuid, TreeNode>,
            task_id: Uuid,
            allowed: &[TaskStatus],
        ) -> (bool, HashSet<Uuid>) {
            let Some(node) = tree.get(&task_id) else {
                return (true, HashSet::new());
            };

            let node_matches = node.matches_status(allowed);

            let mut all_children_match = true;
            let mut deletable_children = HashSet::new();
            for child_id in &node.children_ids {
                let (child_matches, child_deletable) = validate_subtree(tree, *child_id, allowed);
                if !child_matches {
                    all_children_match = false;
                }
                deletable_children.extend(child_deletable);
            }

            if node_matches && all_children_match {
                let mut deletable = deletable_children;
                deletable.insert(task_id);
                (true, deletable)
            } else if !node_matches && !deletable_children.is_empty() {
                (false, deletable_children)
            } else {
                // A matching node above a non-matching descendant keeps
                // its whole subtree, deletable grandchildren included.
                (false, HashSet::new())
            }
        }

        let (_, deletable) = validate_subtree(tree, root_id, allowed_statuses);
        deletable
    }

    /// Recursive tree prune with partial-tree preservation.
    ///
    /// Each root is processed in its own transaction; deletions go
    /// children-first in bounded chunks. Dry runs produce identical
    /// counts without touching any row.
    pub async fn delete_task_trees_recursive(
        &self,
        root_task_ids: &[Uuid],
        filters: &PruneFilters,
    ) -> DomainResult<RecursivePruneResult> {
        let allowed = filters
            .statuses
            .clone()
            .unwrap_or_else(|| PRUNEABLE_STATUSES.to_vec());

        let mut result = RecursivePruneResult {
            dry_run: filters.dry_run,
            ..Default::default()
        };

        for root in root_task_ids {
            let tree = self
                .get_task_tree_with_status(&[*root], None, DEFAULT_MAX_DEPTH)
                .await?;
            if tree.is_empty() {
                debug!(root = %root, "prune root not found, skipping");
                continue;
            }

            let deletable = Self::validate_tree_deletability(&tree, *root, &allowed);
            let fully_deleted = deletable.len() == tree.len();
            let root_matches = tree
                .get(root)
                .is_some_and(|node| node.matches_status(&allowed));

            if deletable.is_empty() {
                if root_matches {
                    // Root matched but a descendant blocked the subtree
                    result.partial_trees += 1;
                }
                continue;
            }

            if fully_deleted {
                result.trees_deleted += 1;
            } else {
                result.partial_trees += 1;
            }

            // Children before parents
            let mut ordered: Vec<&TreeNode> =
                deletable.iter().filter_map(|id| tree.get(id)).collect();
            ordered.sort_by(|a, b| b.depth.cmp(&a.depth).then(a.id.cmp(&b.id)));

            for node in &ordered {
                *result.deleted_by_depth.entry(node.depth).or_default() += 1;
                *result.breakdown_by_status.entry(node.status).or_default() += 1;
                result.tree_depth = result.tree_depth.max(node.depth);
            }

            let ids: Vec<Uuid> = ordered.iter().map(|n| n.id).collect();
            result.deleted_dependencies += self.count_edges_touching(&ids).await?;
            result.deleted_tasks += ids.len() as u64;

            if !filters.dry_run {
                self.delete_ids_transactional(&ids).await?;
                info!(root = %root, deleted = ids.len(), "pruned task tree");
            }
        }

        let (reclaimed, skipped) = self
            .apply_vacuum_policy(filters.vacuum_mode, result.deleted_tasks, filters.dry_run)
            .await?;
        result.reclaimed_bytes = reclaimed;
        result.vacuum_auto_skipped = skipped;

        Ok(result)
    }

    /// Flat (non-recursive) prune by filters.
    pub async fn prune_tasks(&self, filters: &PruneFilters) -> DomainResult<PruneResult> {
        let (where_sql, params) = filters.build_where_clause();

        let mut sql = format!("SELECT id, status FROM tasks WHERE {where_sql}");
        if let Some(limit) = filters.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        let mut result = PruneResult {
            dry_run: filters.dry_run,
            ..Default::default()
        };

        let mut ids = Vec::new();
        for row in &rows {
            let id = parse_uuid(&row.try_get::<String, _>("id").map_err(DatabaseError::from)?)?;
            let status: TaskStatus = row
                .try_get::<String, _>("status")
                .map_err(DatabaseError::from)?
                .parse()?;
            *result.breakdown_by_status.entry(status).or_default() += 1;
            ids.push(id);
        }

        result.deleted_tasks = ids.len() as u64;
        result.deleted_dependencies = self.count_edges_touching(&ids).await?;

        if !filters.dry_run && !ids.is_empty() {
            self.delete_ids_transactional(&ids).await?;
            info!(deleted = ids.len(), "pruned tasks");
        }

        let (reclaimed, skipped) = self
            .apply_vacuum_policy(filters.vacuum_mode, result.deleted_tasks, filters.dry_run)
            .await?;
        result.reclaimed_bytes = reclaimed;
        result.vacuum_auto_skipped = skipped;

        Ok(result)
    }

    /// Roots for a filter-driven recursive prune: matching tasks whose
    /// parent does not itself match (so each tree is counted once).
    pub async fn find_candidate_roots(&self, filters: &PruneFilters) -> DomainResult<Vec<Uuid>> {
        if let Some(ids) = &filters.task_ids {
            if !ids.is_empty() {
                return Ok(ids.clone());
            }
        }

        let (where_sql, params) = filters.build_where_clause();
        let sql = format!("SELECT id, parent_task_id FROM tasks WHERE {where_sql}");
        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        let mut matching = HashSet::new();
        let mut parents = HashMap::new();
        for row in &rows {
            let id = parse_uuid(&row.try_get::<String, _>("id").map_err(DatabaseError::from)?)?;
            let parent = row
                .try_get::<Option<String>, _>("parent_task_id")
                .map_err(DatabaseError::from)?
                .as_deref()
                .map(parse_uuid)
                .transpose()?;
            matching.insert(id);
            parents.insert(id, parent);
        }

        let mut roots: Vec<Uuid> = matching
            .iter()
            .filter(|id| match parents.get(*id) {
                Some(Some(parent)) => !matching.contains(parent),
                _ => true,
            })
            .copied()
            .collect();
        roots.sort();
        Ok(roots)
    }

    /// Count dependency edges touching any of the given ids.
    async fn count_edges_touching(&self, ids: &[Uuid]) -> DomainResult<u64> {
        let mut total = 0i64;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT COUNT(*) FROM task_dependencies
                 WHERE dependent_task_id IN ({placeholders})
                    OR prerequisite_task_id IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            for id in chunk {
                query = query.bind(id.to_string());
            }
            let count: i64 = query
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from)?
                .try_get(0)
                .map_err(DatabaseError::from)?;
            total += count;
        }
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Delete the given ids in chunks within one transaction.
    ///
    /// Edges and agent rows cascade; audit rows survive by design.
    async fn delete_ids_transactional(&self, ids: &[Uuid]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("DELETE FROM tasks WHERE id IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            query.execute(&mut *tx).await.map_err(DatabaseError::from)?;
        }

        sqlx::query(
            "INSERT INTO audit (timestamp, action_type, action_data)
             VALUES (?, 'tasks_pruned', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(serde_json::json!({"count": ids.len()}).to_string())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Apply the vacuum policy; returns (reclaimed bytes, auto-skipped).
    async fn apply_vacuum_policy(
        &self,
        mode: VacuumMode,
        deleted: u64,
        dry_run: bool,
    ) -> DomainResult<(Option<u64>, bool)> {
        let task_count: i64 = sqlx::query("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .try_get(0)
            .map_err(DatabaseError::from)?;

        let auto_skipped = mode == VacuumMode::Conditional && task_count > VACUUM_SKIP_THRESHOLD;

        let should_vacuum = !dry_run
            && deleted > 0
            && match mode {
                VacuumMode::Always => true,
                VacuumMode::Conditional => !auto_skipped,
                VacuumMode::Never => false,
            };

        if !should_vacuum {
            return Ok((None, auto_skipped));
        }

        let before = self.database_size_bytes().await?;
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        let after = self.database_size_bytes().await?;
        Ok((Some(before.saturating_sub(after)), auto_skipped))
    }

    async fn database_size_bytes(&self) -> DomainResult<u64> {
        let page_count: i64 = sqlx::query("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .try_get(0)
            .map_err(DatabaseError::from)?;
        let page_size: i64 = sqlx::query("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .try_get(0)
            .map_err(DatabaseError::from)?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }
}
