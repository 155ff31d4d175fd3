//! `mem` subcommands: list, show, prune.

use clap::Subcommand;

use crate::cli::output::table;
use crate::cli::{parse_older_than, AppContext, CliError};
use crate::domain::models::MemoryType;

#[derive(Debug, Subcommand)]
pub enum MemCommands {
    /// List memory entries, optionally under a namespace prefix
    List {
        /// Namespace prefix (e.g. user:alice)
        #[arg(long)]
        namespace: Option<String>,
        /// Filter by type (semantic, episodic, procedural)
        #[arg(long = "type")]
        memory_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Show entries under a namespace prefix, or one key in full
    Show {
        /// Namespace prefix
        namespace: String,
        /// Specific key: prints the latest value and version history
        #[arg(long)]
        key: Option<String>,
    },

    /// Soft-delete memory entries
    Prune {
        /// Namespace prefix to prune under
        #[arg(long)]
        namespace: String,
        /// Restrict to one type
        #[arg(long = "type")]
        memory_type: Option<String>,
        /// Age filter: <N>d, <N>w, <N>m, or <N>y
        #[arg(long)]
        older_than: Option<String>,
    },
}

pub async fn handle(ctx: &AppContext, command: MemCommands, json: bool) -> Result<(), CliError> {
    match command {
        MemCommands::List {
            namespace,
            memory_type,
            limit,
        } => {
            let memory_type = parse_type_opt(memory_type.as_deref())?;
            let entries = ctx
                .memory
                .search_memories(namespace.as_deref().unwrap_or(""), memory_type, limit)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
            } else if entries.is_empty() {
                println!("No memory entries found");
            } else {
                println!("{}", table::memory_table(&entries));
            }
            Ok(())
        }

        MemCommands::Show { namespace, key } => {
            if let Some(key) = key {
                let entry = ctx
                    .memory
                    .get_memory(&namespace, &key, None)
                    .await?
                    .ok_or_else(|| {
                        CliError::runtime(format!("Memory {namespace}:{key} not found"))
                    })?;
                let history = ctx.memory.get_memory_history(&namespace, &key).await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&entry).unwrap_or_default());
                } else {
                    println!("namespace: {}", entry.namespace);
                    println!("key:       {}", entry.key);
                    println!("type:      {}", entry.memory_type.as_str());
                    println!("version:   {} ({} total)", entry.version, history.len());
                    println!("updated:   {}", entry.updated_at.to_rfc3339());
                    println!(
                        "value:     {}",
                        serde_json::to_string_pretty(&entry.value).unwrap_or_default()
                    );
                }
            } else {
                let entries = ctx.memory.search_memories(&namespace, None, 100).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
                } else if entries.is_empty() {
                    println!("No memory entries under {namespace}");
                } else {
                    println!("{}", table::memory_table(&entries));
                }
            }
            Ok(())
        }

        MemCommands::Prune {
            namespace,
            memory_type,
            older_than,
        } => {
            let memory_type = parse_type_opt(memory_type.as_deref())?;
            let older_than_days = older_than.as_deref().map(parse_older_than).transpose()?;

            let count = ctx
                .memory
                .prune_memories(&namespace, memory_type, older_than_days)
                .await?;

            if json {
                println!("{}", serde_json::json!({ "pruned": count }));
            } else {
                println!("Pruned {count} memory entr{}", if count == 1 { "y" } else { "ies" });
            }
            Ok(())
        }
    }
}

fn parse_type_opt(s: Option<&str>) -> Result<Option<MemoryType>, CliError> {
    s.map(|s| {
        s.parse::<MemoryType>()
            .map_err(|e| CliError::validation(e.to_string()))
    })
    .transpose()
}
