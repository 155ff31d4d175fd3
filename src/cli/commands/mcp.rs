//! `mcp` subcommands: list, start, stop, restart, status.

use clap::Subcommand;

use crate::cli::{AppContext, CliError};

#[derive(Debug, Subcommand)]
pub enum McpCommands {
    /// List configured MCP servers
    List,
    /// Start one server
    Start { name: String },
    /// Stop one server
    Stop { name: String },
    /// Restart one server
    Restart { name: String },
    /// Show server status (all servers when no name is given)
    Status { name: Option<String> },
}

pub async fn handle(ctx: &AppContext, command: McpCommands, json: bool) -> Result<(), CliError> {
    match command {
        McpCommands::List => {
            let names = ctx.mcp.server_names();
            if json {
                println!("{}", serde_json::to_string_pretty(&names).unwrap_or_default());
            } else if names.is_empty() {
                println!("No MCP servers configured");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            Ok(())
        }

        McpCommands::Start { name } => {
            if ctx.mcp.start_server(&name).await {
                println!("MCP server {name} started");
                Ok(())
            } else {
                Err(CliError::runtime(format!("Failed to start MCP server {name}")))
            }
        }

        McpCommands::Stop { name } => {
            if ctx.mcp.stop_server(&name).await {
                println!("MCP server {name} stopped");
                Ok(())
            } else {
                Err(CliError::runtime(format!("Failed to stop MCP server {name}")))
            }
        }

        McpCommands::Restart { name } => {
            if ctx.mcp.restart_server(&name).await {
                println!("MCP server {name} restarted");
                Ok(())
            } else {
                Err(CliError::runtime(format!("Failed to restart MCP server {name}")))
            }
        }

        McpCommands::Status { name } => {
            let statuses = match name {
                Some(name) => {
                    let status = ctx.mcp.get_server_status(&name).await.ok_or_else(|| {
                        CliError::runtime(format!("MCP server {name} not found"))
                    })?;
                    vec![status]
                }
                None => ctx.mcp.get_all_server_status().await,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&statuses).unwrap_or_default());
            } else if statuses.is_empty() {
                println!("No MCP servers configured");
            } else {
                for status in statuses {
                    let pid = status
                        .pid
                        .map_or_else(|| "-".to_string(), |pid| pid.to_string());
                    println!("{:<24} {:<10} pid {}", status.name, status.state.as_str(), pid);
                    if let Some(error) = status.error_message {
                        println!("    error: {error}");
                    }
                }
            }
            Ok(())
        }
    }
}
