//! `task` subcommands: submit, list, show, prune.

use std::io::Write;

use clap::Subcommand;
use console::style;
use uuid::Uuid;

use crate::cli::output::table;
use crate::cli::{parse_older_than, AppContext, CliError};
use crate::domain::models::{
    PruneFilters, Task, TaskSource, TaskStatus, VacuumMode,
};
use crate::infrastructure::database::TaskFilters;

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Submit a new task to the queue
    Submit {
        /// Prompt text for the executor
        prompt: String,
        /// Task source (human, agent_requirements, agent_planner, agent_implementation)
        #[arg(long, default_value = "human")]
        source: String,
        /// Comma-separated prerequisite task ids
        #[arg(long, value_delimiter = ',')]
        prereqs: Vec<String>,
        /// Base priority 0-10
        #[arg(long, default_value_t = 5)]
        priority: u8,
        /// Deadline (RFC3339, e.g. 2026-03-01T12:00:00Z)
        #[arg(long)]
        deadline: Option<String>,
        /// Executor profile
        #[arg(long)]
        agent_type: Option<String>,
        /// Explicit summary (autogenerated when omitted)
        #[arg(long)]
        summary: Option<String>,
        /// Owning session id
        #[arg(long)]
        session: Option<String>,
        /// Parent task id (tree hierarchy)
        #[arg(long)]
        parent: Option<String>,
    },

    /// List tasks
    List {
        /// Only this status
        #[arg(long, conflicts_with = "exclude_status")]
        status: Option<String>,
        /// Every status except this one
        #[arg(long)]
        exclude_status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Show one task in full, with its children
    Show { task_id: String },

    /// Delete terminal tasks
    Prune {
        /// Statuses to prune (completed, failed, cancelled)
        #[arg(long, value_delimiter = ',')]
        status: Vec<String>,
        /// Age filter: <N>d, <N>w, <N>m, or <N>y
        #[arg(long)]
        older_than: Option<String>,
        /// Specific task ids
        #[arg(long, value_delimiter = ',')]
        task_ids: Vec<String>,
        /// Tree-aware recursive deletion with partial-tree preservation
        #[arg(long)]
        recursive: bool,
        /// Preview only; touch no rows
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        /// Space reclamation policy (always, conditional, never)
        #[arg(long, default_value = "conditional")]
        vacuum: String,
    },
}

pub async fn handle(ctx: &AppContext, command: TaskCommands, json: bool) -> Result<(), CliError> {
    match command {
        TaskCommands::Submit {
            prompt,
            source,
            prereqs,
            priority,
            deadline,
            agent_type,
            summary,
            session,
            parent,
        } => {
            let source: TaskSource = source
                .parse()
                .map_err(|e: crate::domain::errors::DomainError| CliError::validation(e.to_string()))?;

            let mut task = Task::new(prompt)
                .with_source(source)
                .with_priority(priority)
                .with_dependencies(parse_ids(&prereqs)?);

            if let Some(agent_type) = agent_type {
                task = task.with_agent_type(agent_type);
            }
            if let Some(summary) = summary {
                task = task.with_summary(summary);
            }
            if let Some(session) = session {
                task = task.with_session(session);
            }
            if let Some(parent) = parent {
                task = task.with_parent(parse_id(&parent)?);
            }
            if let Some(deadline) = deadline {
                let deadline = chrono::DateTime::parse_from_rfc3339(&deadline)
                    .map_err(|e| CliError::validation(format!("invalid --deadline: {e}")))?;
                task = task.with_deadline(deadline.with_timezone(&chrono::Utc));
            }

            let task = ctx.task_queue.enqueue_task(task).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&task).unwrap_or_default());
            } else {
                println!(
                    "Task {} submitted ({}, priority {:.1})",
                    task.id,
                    task.status.as_str(),
                    task.calculated_priority
                );
            }
            Ok(())
        }

        TaskCommands::List {
            status,
            exclude_status,
            limit,
        } => {
            let filters = TaskFilters {
                status: parse_status_opt(status.as_deref())?,
                exclude_status: parse_status_opt(exclude_status.as_deref())?,
                limit: Some(limit),
                ..TaskFilters::default()
            };
            let tasks = ctx.task_queue.list(filters).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&tasks).unwrap_or_default());
            } else if tasks.is_empty() {
                println!("No tasks found");
            } else {
                println!("{}", table::task_table(&tasks));
            }
            Ok(())
        }

        TaskCommands::Show { task_id } => {
            let id = parse_id(&task_id)?;
            let task = ctx
                .task_queue
                .get(id)
                .await?
                .ok_or_else(|| CliError::runtime(format!("Task {id} not found")))?;
            let children = ctx.task_queue.get_children(id).await?;

            if json {
                let mut value = serde_json::to_value(&task).unwrap_or_default();
                value["children"] = serde_json::to_value(&children).unwrap_or_default();
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            } else {
                print_task_detail(&task);
                if !children.is_empty() {
                    println!("\nChildren ({}):", children.len());
                    println!("{}", table::child_table(&children));
                }
            }
            Ok(())
        }

        TaskCommands::Prune {
            status,
            older_than,
            task_ids,
            recursive,
            dry_run,
            force,
            vacuum,
        } => {
            let statuses = status
                .iter()
                .map(|s| s.parse::<TaskStatus>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CliError::validation(e.to_string()))?;
            let vacuum_mode: VacuumMode = vacuum
                .parse()
                .map_err(|e: crate::domain::errors::DomainError| CliError::validation(e.to_string()))?;

            let filters = PruneFilters {
                task_ids: if task_ids.is_empty() {
                    None
                } else {
                    Some(parse_ids(&task_ids)?)
                },
                older_than_days: older_than.as_deref().map(parse_older_than).transpose()?,
                statuses: if statuses.is_empty() { None } else { Some(statuses) },
                dry_run,
                vacuum_mode,
                recursive,
                ..PruneFilters::default()
            }
            .validate()
            .map_err(|e| CliError::validation(e.to_string()))?;

            // Preview before any deletion
            let preview = preview_tasks(ctx, &filters).await?;
            if preview.is_empty() {
                println!("Nothing to prune");
                return Ok(());
            }

            println!("{}", table::prune_preview_table(&preview));
            println!("{} task(s) match the prune filters", preview.len());

            if dry_run {
                println!("{}", style("Dry run: no rows were touched").yellow());
            } else if !force && !confirm("Proceed with deletion? [y/N] ")? {
                println!("Aborted");
                return Ok(());
            }

            if recursive {
                let roots = ctx.tree_ops.find_candidate_roots(&filters).await?;
                let result = ctx
                    .tree_ops
                    .delete_task_trees_recursive(&roots, &filters)
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                } else {
                    println!(
                        "Deleted {} task(s) and {} dependency edge(s); \
                         {} tree(s) fully removed, {} partial tree(s) preserved",
                        result.deleted_tasks,
                        result.deleted_dependencies,
                        result.trees_deleted,
                        result.partial_trees
                    );
                    if result.vacuum_auto_skipped {
                        println!("Vacuum skipped automatically (large task table)");
                    }
                }
            } else {
                let result = ctx.tree_ops.prune_tasks(&filters).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                } else {
                    println!(
                        "Deleted {} task(s) and {} dependency edge(s)",
                        result.deleted_tasks, result.deleted_dependencies
                    );
                    if let Some(bytes) = result.reclaimed_bytes {
                        println!("Reclaimed {bytes} bytes");
                    }
                    if result.vacuum_auto_skipped {
                        println!("Vacuum skipped automatically (large task table)");
                    }
                }
            }
            Ok(())
        }
    }
}

/// All 29 task fields, in serialization order.
fn print_task_detail(task: &Task) {
    let dependencies = task
        .dependencies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let field = |name: &str, value: String| println!("{:>32}: {}", name, value);
    let opt = |value: Option<String>| value.unwrap_or_else(|| "null".to_string());

    field("id", task.id.to_string());
    field("prompt", task.prompt.clone());
    field("summary", opt(task.summary.clone()));
    field("agent_type", task.agent_type.clone());
    field("priority", task.priority.to_string());
    field("calculated_priority", format!("{:.2}", task.calculated_priority));
    field("status", task.status.as_str().to_string());
    field("source", task.source.as_str().to_string());
    field("dependency_type", task.dependency_type.as_str().to_string());
    field("dependency_depth", task.dependency_depth.to_string());
    field("dependencies", if dependencies.is_empty() { "[]".to_string() } else { format!("[{dependencies}]") });
    field("input_data", opt(task.input_data.as_ref().map(ToString::to_string)));
    field("result_data", opt(task.result_data.as_ref().map(ToString::to_string)));
    field("error_message", opt(task.error_message.clone()));
    field("retry_count", task.retry_count.to_string());
    field("max_retries", task.max_retries.to_string());
    field("max_execution_timeout_seconds", task.max_execution_timeout_seconds.to_string());
    field("estimated_duration_seconds", opt(task.estimated_duration_seconds.map(|v| v.to_string())));
    field("deadline", opt(task.deadline.map(|dt| dt.to_rfc3339())));
    field("submitted_at", task.submitted_at.to_rfc3339());
    field("started_at", opt(task.started_at.map(|dt| dt.to_rfc3339())));
    field("completed_at", opt(task.completed_at.map(|dt| dt.to_rfc3339())));
    field("last_updated_at", task.last_updated_at.to_rfc3339());
    field("parent_task_id", opt(task.parent_task_id.map(|id| id.to_string())));
    field("session_id", opt(task.session_id.clone()));
    field("feature_branch", opt(task.feature_branch.clone()));
    field("task_branch", opt(task.task_branch.clone()));
    field("worktree_path", opt(task.worktree_path.clone()));
    field("created_by", opt(task.created_by.clone()));
}

async fn preview_tasks(ctx: &AppContext, filters: &PruneFilters) -> Result<Vec<Task>, CliError> {
    // The preview applies the same selection rules as the deletion paths.
    let mut matching = Vec::new();
    let statuses = filters.statuses.clone().unwrap_or_default();

    if let Some(ids) = &filters.task_ids {
        for id in ids {
            if let Some(task) = ctx.task_queue.get(*id).await? {
                if statuses.is_empty() || statuses.contains(&task.status) {
                    matching.push(task);
                }
            }
        }
        return Ok(matching);
    }

    let all = ctx.task_queue.list(TaskFilters::default()).await?;
    let cutoff = filters
        .older_than_days
        .map(|days| chrono::Utc::now() - chrono::Duration::days(i64::from(days)));

    for task in all {
        if !statuses.is_empty() && !statuses.contains(&task.status) {
            continue;
        }
        if let Some(cutoff) = cutoff {
            let reference = task.completed_at.unwrap_or(task.submitted_at);
            if reference >= cutoff {
                continue;
            }
        }
        matching.push(task);
    }
    Ok(matching)
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    print!("{prompt}");
    std::io::stdout()
        .flush()
        .map_err(|e| CliError::runtime(e.to_string()))?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| CliError::runtime(e.to_string()))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn parse_id(s: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(s.trim())
        .map_err(|_| CliError::validation(format!("invalid task id: {s:?}")))
}

fn parse_ids(ids: &[String]) -> Result<Vec<Uuid>, CliError> {
    ids.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_id(s))
        .collect()
}

fn parse_status_opt(s: Option<&str>) -> Result<Option<TaskStatus>, CliError> {
    s.map(|s| {
        s.parse::<TaskStatus>()
            .map_err(|e| CliError::validation(e.to_string()))
    })
    .transpose()
}
