//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};

use crate::domain::models::{MemoryEntry, Task};

/// Child summaries are truncated to this width in `task show`.
const CHILD_SUMMARY_WIDTH: usize = 40;

/// Build the standard task listing table.
pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = base_table(vec!["ID", "STATUS", "PRIORITY", "SUMMARY", "SUBMITTED"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(short_id(&task.id.to_string())),
            Cell::new(task.status.as_str()),
            Cell::new(format!("{:.1}", task.calculated_priority)),
            Cell::new(truncate(&task.display_summary(), 60)),
            Cell::new(task.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}

/// Child listing under `task show`: summary truncated at 40 chars with an
/// ellipsis, `-` when absent.
pub fn child_table(children: &[Task]) -> Table {
    let mut table = base_table(vec!["ID", "STATUS", "SUMMARY", "SUBMITTED"]);
    for child in children {
        let summary = match &child.summary {
            Some(s) if !s.is_empty() => truncate(s, CHILD_SUMMARY_WIDTH),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(child.id.to_string()),
            Cell::new(child.status.as_str()),
            Cell::new(summary),
            Cell::new(child.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}

/// Prune preview table shown before any deletion.
pub fn prune_preview_table(tasks: &[Task]) -> Table {
    let mut table = base_table(vec!["ID", "STATUS", "SUMMARY", "COMPLETED"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(task.id.to_string()),
            Cell::new(task.status.as_str()),
            Cell::new(truncate(&task.display_summary(), 50)),
            Cell::new(
                task.completed_at
                    .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d").to_string()),
            ),
        ]);
    }
    table
}

/// Memory listing table.
pub fn memory_table(entries: &[MemoryEntry]) -> Table {
    let mut table = base_table(vec!["NAMESPACE", "KEY", "TYPE", "VERSION", "UPDATED"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.namespace),
            Cell::new(&entry.key),
            Cell::new(entry.memory_type.as_str()),
            Cell::new(entry.version.to_string()),
            Cell::new(entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}

fn base_table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers);
    table
}

/// First 8 hex chars of an id for compact listings.
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}
