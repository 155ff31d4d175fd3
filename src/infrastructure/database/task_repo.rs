//! SQLite repository for tasks and dependency edges.
//!
//! The multi-statement lifecycle operations (enqueue, complete, fail) run
//! inside single transactions here so no reader can observe a completed
//! task with unresolved outgoing edges.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::{Task, TaskDependency, TaskStatus};
use crate::infrastructure::database::errors::DatabaseError;
use crate::infrastructure::database::utils::{
    parse_datetime, parse_datetime_opt, parse_uuid, parse_uuid_opt,
};

/// Filters for task list/count queries.
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub exclude_status: Option<TaskStatus>,
    pub parent_task_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub agent_type: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite implementation of task storage.
pub struct TaskRepo {
    pool: SqlitePool,
}

impl TaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task, DatabaseError> {
        let status: String = row.try_get("status").map_err(DatabaseError::from)?;
        let source: String = row.try_get("source").map_err(DatabaseError::from)?;
        let dependency_type: String = row
            .try_get("dependency_type")
            .map_err(DatabaseError::from)?;

        let input_data: Option<String> = row.try_get("input_data").map_err(DatabaseError::from)?;
        let result_data: Option<String> =
            row.try_get("result_data").map_err(DatabaseError::from)?;

        Ok(Task {
            id: parse_uuid(&row.try_get::<String, _>("id").map_err(DatabaseError::from)?)?,
            prompt: row.try_get("prompt").map_err(DatabaseError::from)?,
            summary: row.try_get("summary").map_err(DatabaseError::from)?,
            agent_type: row.try_get("agent_type").map_err(DatabaseError::from)?,
            priority: u8::try_from(row.try_get::<i64, _>("priority").map_err(DatabaseError::from)?)
                .map_err(|_| DatabaseError::Corrupted("priority out of range".into()))?,
            calculated_priority: row
                .try_get("calculated_priority")
                .map_err(DatabaseError::from)?,
            status: status
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            source: source
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            dependency_type: dependency_type
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            dependency_depth: u32::try_from(
                row.try_get::<i64, _>("dependency_depth")
                    .map_err(DatabaseError::from)?,
            )
            .unwrap_or(0),
            // Hydrated from task_dependencies by the callers below
            dependencies: Vec::new(),
            input_data: input_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DatabaseError::Corrupted(format!("bad input_data json: {e}")))?,
            result_data: result_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| DatabaseError::Corrupted(format!("bad result_data json: {e}")))?,
            error_message: row.try_get("error_message").map_err(DatabaseError::from)?,
            retry_count: u32::try_from(
                row.try_get::<i64, _>("retry_count")
                    .map_err(DatabaseError::from)?,
            )
            .unwrap_or(0),
            max_retries: u32::try_from(
                row.try_get::<i64, _>("max_retries")
                    .map_err(DatabaseError::from)?,
            )
            .unwrap_or(0),
            max_execution_timeout_seconds: u32::try_from(
                row.try_get::<i64, _>("max_execution_timeout_seconds")
                    .map_err(DatabaseError::from)?,
            )
            .unwrap_or(3600),
            estimated_duration_seconds: row
                .try_get::<Option<i64>, _>("estimated_duration_seconds")
                .map_err(DatabaseError::from)?
                .and_then(|v| u32::try_from(v).ok()),
            deadline: parse_datetime_opt(
                row.try_get::<Option<String>, _>("deadline")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
            submitted_at: parse_datetime(
                &row.try_get::<String, _>("submitted_at")
                    .map_err(DatabaseError::from)?,
            )?,
            started_at: parse_datetime_opt(
                row.try_get::<Option<String>, _>("started_at")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
            completed_at: parse_datetime_opt(
                row.try_get::<Option<String>, _>("completed_at")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
            last_updated_at: parse_datetime(
                &row.try_get::<String, _>("last_updated_at")
                    .map_err(DatabaseError::from)?,
            )?,
            parent_task_id: parse_uuid_opt(
                row.try_get::<Option<String>, _>("parent_task_id")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
            session_id: row.try_get("session_id").map_err(DatabaseError::from)?,
            feature_branch: row.try_get("feature_branch").map_err(DatabaseError::from)?,
            task_branch: row.try_get("task_branch").map_err(DatabaseError::from)?,
            worktree_path: row.try_get("worktree_path").map_err(DatabaseError::from)?,
            created_by: row.try_get("created_by").map_err(DatabaseError::from)?,
        })
    }

    fn row_to_dependency(row: &SqliteRow) -> Result<TaskDependency, DatabaseError> {
        let dependency_type: String = row
            .try_get("dependency_type")
            .map_err(DatabaseError::from)?;
        Ok(TaskDependency {
            id: parse_uuid(&row.try_get::<String, _>("id").map_err(DatabaseError::from)?)?,
            dependent_task_id: parse_uuid(
                &row.try_get::<String, _>("dependent_task_id")
                    .map_err(DatabaseError::from)?,
            )?,
            prerequisite_task_id: parse_uuid(
                &row.try_get::<String, _>("prerequisite_task_id")
                    .map_err(DatabaseError::from)?,
            )?,
            dependency_type: dependency_type
                .parse()
                .map_err(|e| DatabaseError::Corrupted(format!("{e}")))?,
            created_at: parse_datetime(
                &row.try_get::<String, _>("created_at")
                    .map_err(DatabaseError::from)?,
            )?,
            resolved_at: parse_datetime_opt(
                row.try_get::<Option<String>, _>("resolved_at")
                    .map_err(DatabaseError::from)?
                    .as_deref(),
            )?,
        })
    }

    /// Hydrate `task.dependencies` from the edge table.
    async fn hydrate_dependencies(&self, task: &mut Task) -> Result<(), DatabaseError> {
        let rows = sqlx::query(
            "SELECT prerequisite_task_id FROM task_dependencies
             WHERE dependent_task_id = ? ORDER BY created_at ASC",
        )
        .bind(task.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        task.dependencies = rows
            .iter()
            .map(|row| {
                parse_uuid(
                    &row.try_get::<String, _>("prerequisite_task_id")
                        .map_err(DatabaseError::from)?,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    async fn hydrate_all(&self, tasks: &mut [Task]) -> Result<(), DatabaseError> {
        for task in tasks.iter_mut() {
            self.hydrate_dependencies(task).await?;
        }
        Ok(())
    }

    /// Insert a task together with its dependency edges, atomically.
    ///
    /// Edges whose prerequisite is already completed are inserted with
    /// `resolved_at` set. An audit row records the submission.
    pub async fn insert_with_dependencies(
        &self,
        task: &Task,
        edges: &[TaskDependency],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let input_data = task
            .input_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable input_data: {e}")))?;
        let result_data = task
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable result_data: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO tasks (
                id, prompt, summary, agent_type, priority, calculated_priority,
                status, source, dependency_type, dependency_depth,
                input_data, result_data, error_message, retry_count, max_retries,
                max_execution_timeout_seconds, estimated_duration_seconds, deadline,
                submitted_at, started_at, completed_at, last_updated_at,
                parent_task_id, session_id, feature_branch, task_branch,
                worktree_path, created_by
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(task.id.to_string())
        .bind(&task.prompt)
        .bind(&task.summary)
        .bind(&task.agent_type)
        .bind(i64::from(task.priority))
        .bind(task.calculated_priority)
        .bind(task.status.as_str())
        .bind(task.source.as_str())
        .bind(task.dependency_type.as_str())
        .bind(i64::from(task.dependency_depth))
        .bind(input_data)
        .bind(result_data)
        .bind(&task.error_message)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(i64::from(task.max_execution_timeout_seconds))
        .bind(task.estimated_duration_seconds.map(i64::from))
        .bind(task.deadline.map(|dt| dt.to_rfc3339()))
        .bind(task.submitted_at.to_rfc3339())
        .bind(task.started_at.map(|dt| dt.to_rfc3339()))
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(task.last_updated_at.to_rfc3339())
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(&task.session_id)
        .bind(&task.feature_branch)
        .bind(&task.task_branch)
        .bind(&task.worktree_path)
        .bind(&task.created_by)
        .execute(&mut *tx)
        .await?;

        for edge in edges {
            sqlx::query(
                r"
                INSERT INTO task_dependencies (
                    id, dependent_task_id, prerequisite_task_id,
                    dependency_type, created_at, resolved_at
                )
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(edge.id.to_string())
            .bind(edge.dependent_task_id.to_string())
            .bind(edge.prerequisite_task_id.to_string())
            .bind(edge.dependency_type.as_str())
            .bind(edge.created_at.to_rfc3339())
            .bind(edge.resolved_at.map(|dt| dt.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO audit (timestamp, task_id, action_type, action_data)
             VALUES (?, ?, 'task_submitted', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(task.id.to_string())
        .bind(
            serde_json::json!({
                "status": task.status.as_str(),
                "prerequisites": edges.len(),
            })
            .to_string(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut task = Self::row_to_task(&row)?;
                self.hydrate_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Update mutable task fields. `last_updated_at` is always refreshed.
    pub async fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        let input_data = task
            .input_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable input_data: {e}")))?;
        let result_data = task
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable result_data: {e}")))?;

        let affected = sqlx::query(
            r"
            UPDATE tasks SET
                prompt = ?, summary = ?, agent_type = ?, priority = ?,
                calculated_priority = ?, status = ?, source = ?,
                dependency_type = ?, dependency_depth = ?, input_data = ?,
                result_data = ?, error_message = ?, retry_count = ?,
                max_retries = ?, max_execution_timeout_seconds = ?,
                estimated_duration_seconds = ?, deadline = ?, started_at = ?,
                completed_at = ?, last_updated_at = ?, parent_task_id = ?,
                session_id = ?, feature_branch = ?, task_branch = ?,
                worktree_path = ?, created_by = ?
            WHERE id = ?
            ",
        )
        .bind(&task.prompt)
        .bind(&task.summary)
        .bind(&task.agent_type)
        .bind(i64::from(task.priority))
        .bind(task.calculated_priority)
        .bind(task.status.as_str())
        .bind(task.source.as_str())
        .bind(task.dependency_type.as_str())
        .bind(i64::from(task.dependency_depth))
        .bind(input_data)
        .bind(result_data)
        .bind(&task.error_message)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(i64::from(task.max_execution_timeout_seconds))
        .bind(task.estimated_duration_seconds.map(i64::from))
        .bind(task.deadline.map(|dt| dt.to_rfc3339()))
        .bind(task.started_at.map(|dt| dt.to_rfc3339()))
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(&task.session_id)
        .bind(&task.feature_branch)
        .bind(&task.task_branch)
        .bind(&task.worktree_path)
        .bind(&task.created_by)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Update calculated priority only (batch recalculation path).
    pub async fn update_calculated_priority(
        &self,
        id: Uuid,
        priority: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE tasks SET calculated_priority = ?, last_updated_at = ? WHERE id = ?",
        )
        .bind(priority)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        let affected = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(DatabaseError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    pub async fn list(&self, filters: &TaskFilters) -> Result<Vec<Task>, DatabaseError> {
        let (sql, binds) = Self::build_list_query("SELECT *", filters);
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()?;
        self.hydrate_all(&mut tasks).await?;
        Ok(tasks)
    }

    pub async fn count(&self, filters: &TaskFilters) -> Result<i64, DatabaseError> {
        let (sql, binds) = Self::build_list_query("SELECT COUNT(*)", filters);
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(&self.pool).await?;
        row.try_get(0).map_err(DatabaseError::from)
    }

    fn build_list_query(select: &str, filters: &TaskFilters) -> (String, Vec<String>) {
        let mut sql = format!("{select} FROM tasks WHERE 1=1");
        let mut binds = Vec::new();

        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(exclude) = filters.exclude_status {
            sql.push_str(" AND status <> ?");
            binds.push(exclude.as_str().to_string());
        }
        if let Some(parent) = filters.parent_task_id {
            sql.push_str(" AND parent_task_id = ?");
            binds.push(parent.to_string());
        }
        if let Some(session) = &filters.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(session.clone());
        }
        if let Some(agent_type) = &filters.agent_type {
            sql.push_str(" AND agent_type = ?");
            binds.push(agent_type.clone());
        }

        sql.push_str(" ORDER BY submitted_at ASC");

        if let Some(limit) = filters.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        (sql, binds)
    }

    /// READY tasks ordered for dispatch (priority DESC, submitted ASC).
    pub async fn get_ready_tasks(&self, limit: u32) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'ready'
             ORDER BY calculated_priority DESC, submitted_at ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()?;
        self.hydrate_all(&mut tasks).await?;
        Ok(tasks)
    }

    /// Atomically claim the highest-priority READY task.
    ///
    /// The claim flips READY -> RUNNING and stamps `started_at` inside one
    /// statement, so two pollers can never claim the same task.
    pub async fn claim_next_ready_task(&self) -> Result<Option<Task>, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'running', started_at = ?, last_updated_at = ?
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'ready'
                ORDER BY calculated_priority DESC, submitted_at ASC
                LIMIT 1
            )
            RETURNING *
            ",
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut task = Self::row_to_task(&row)?;
                self.hydrate_dependencies(&mut task).await?;
                debug!(task_id = %task.id, priority = task.calculated_priority, "claimed ready task");
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Tasks that list `prerequisite_id` as a prerequisite.
    pub async fn get_dependents(&self, prerequisite_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT t.* FROM tasks t
             JOIN task_dependencies d ON d.dependent_task_id = t.id
             WHERE d.prerequisite_task_id = ?
             ORDER BY t.submitted_at ASC",
        )
        .bind(prerequisite_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()?;
        self.hydrate_all(&mut tasks).await?;
        Ok(tasks)
    }

    /// Direct children in the parent/child tree, sorted by submission time.
    pub async fn get_children(&self, parent_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE parent_task_id = ? ORDER BY submitted_at ASC",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<Result<Vec<_>, _>>()?;
        self.hydrate_all(&mut tasks).await?;
        Ok(tasks)
    }

    /// All dependency edges pointing at `task_id` (it is the dependent).
    pub async fn get_task_dependencies(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<TaskDependency>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM task_dependencies WHERE dependent_task_id = ? ORDER BY created_at ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_dependency).collect()
    }

    /// All unresolved edges as (dependent, prerequisite) pairs.
    pub async fn get_unresolved_edges(&self) -> Result<Vec<(Uuid, Uuid)>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT dependent_task_id, prerequisite_task_id
             FROM task_dependencies WHERE resolved_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    parse_uuid(
                        &row.try_get::<String, _>("dependent_task_id")
                            .map_err(DatabaseError::from)?,
                    )?,
                    parse_uuid(
                        &row.try_get::<String, _>("prerequisite_task_id")
                            .map_err(DatabaseError::from)?,
                    )?,
                ))
            })
            .collect()
    }

    /// Count of unresolved prerequisites for a task.
    pub async fn count_unresolved_dependencies(&self, task_id: Uuid) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM task_dependencies
             WHERE dependent_task_id = ? AND resolved_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        row.try_get(0).map_err(DatabaseError::from)
    }

    /// Unresolved dependents of a prerequisite (ids only).
    pub async fn get_blocked_dependent_ids(
        &self,
        prerequisite_id: Uuid,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT dependent_task_id FROM task_dependencies
             WHERE prerequisite_task_id = ? AND resolved_at IS NULL",
        )
        .bind(prerequisite_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                parse_uuid(
                    &row.try_get::<String, _>("dependent_task_id")
                        .map_err(DatabaseError::from)?,
                )
            })
            .collect()
    }

    /// Complete a RUNNING task in a single transaction.
    ///
    /// Resolves every outgoing edge, flips dependents whose last
    /// prerequisite this was from BLOCKED to READY, and appends the audit
    /// row. Returns (dependent ids, newly-ready ids).
    pub async fn complete_task_transaction(
        &self,
        task_id: Uuid,
        result_data: Option<&serde_json::Value>,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result_json = result_data
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Corrupted(format!("unserializable result: {e}")))?;

        let affected = sqlx::query(
            "UPDATE tasks
             SET status = 'completed', completed_at = ?, last_updated_at = ?,
                 result_data = COALESCE(?, result_data)
             WHERE id = ? AND status = 'running'",
        )
        .bind(&now)
        .bind(&now)
        .bind(result_json)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!(
                "task {task_id} is not running"
            )));
        }

        // Collect dependents before resolving so we know whom to re-check
        let dependent_rows = sqlx::query(
            "SELECT dependent_task_id FROM task_dependencies
             WHERE prerequisite_task_id = ? AND resolved_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let dependents: Vec<Uuid> = dependent_rows
            .iter()
            .map(|row| {
                parse_uuid(
                    &row.try_get::<String, _>("dependent_task_id")
                        .map_err(DatabaseError::from)?,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(
            "UPDATE task_dependencies SET resolved_at = ?
             WHERE prerequisite_task_id = ? AND resolved_at IS NULL",
        )
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;

        let mut newly_ready = Vec::new();
        for dependent in &dependents {
            let remaining: i64 = sqlx::query(
                "SELECT COUNT(*) FROM task_dependencies
                 WHERE dependent_task_id = ? AND resolved_at IS NULL",
            )
            .bind(dependent.to_string())
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)
            .map_err(DatabaseError::from)?;

            if remaining == 0 {
                let flipped = sqlx::query(
                    "UPDATE tasks SET status = 'ready', last_updated_at = ?
                     WHERE id = ? AND status IN ('blocked', 'pending')",
                )
                .bind(&now)
                .bind(dependent.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if flipped > 0 {
                    newly_ready.push(*dependent);
                }
            }
        }

        sqlx::query(
            "INSERT INTO audit (timestamp, task_id, action_type, action_data)
             VALUES (?, ?, 'task_completed', ?)",
        )
        .bind(&now)
        .bind(task_id.to_string())
        .bind(
            serde_json::json!({
                "unblocked": newly_ready.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })
            .to_string(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((dependents, newly_ready))
    }

    /// Record a task failure in a single transaction.
    ///
    /// When `retry` is true the task goes back to READY with an
    /// incremented retry count; otherwise it lands in FAILED. Either way
    /// the error message and an audit row are recorded. Outgoing edges are
    /// left unresolved, so dependents stay BLOCKED.
    pub async fn fail_task_transaction(
        &self,
        task_id: Uuid,
        error_message: &str,
        retry: bool,
        backoff_delay_secs: u64,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let affected = if retry {
            sqlx::query(
                "UPDATE tasks
                 SET status = 'ready', retry_count = retry_count + 1,
                     error_message = ?, started_at = NULL, last_updated_at = ?
                 WHERE id = ? AND status IN ('running', 'failed')",
            )
            .bind(error_message)
            .bind(&now)
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                "UPDATE tasks
                 SET status = 'failed', error_message = ?, completed_at = ?,
                     last_updated_at = ?
                 WHERE id = ? AND status IN ('running', 'ready')",
            )
            .bind(error_message)
            .bind(&now)
            .bind(&now)
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!(
                "task {task_id} is not in a failable state"
            )));
        }

        sqlx::query(
            "INSERT INTO audit (timestamp, task_id, action_type, action_data)
             VALUES (?, ?, 'task_failed', ?)",
        )
        .bind(&now)
        .bind(task_id.to_string())
        .bind(
            serde_json::json!({
                "error": error_message,
                "retried": retry,
                "backoff_delay_secs": backoff_delay_secs,
            })
            .to_string(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Cancel a task. Terminal; dependents remain blocked.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = sqlx::query(
            "UPDATE tasks
             SET status = 'cancelled', completed_at = ?, last_updated_at = ?
             WHERE id = ? AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DatabaseError::NotFound(format!(
                "task {task_id} not found or already terminal"
            )));
        }
        Ok(())
    }

    /// Flip a task's status directly (startup reconciliation, tests).
    pub async fn set_status(&self, task_id: Uuid, status: TaskStatus) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE tasks SET status = ?, last_updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
