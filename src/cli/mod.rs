//! Command-line interface.
//!
//! Exit codes: 0 success, 1 runtime error, 2 validation error. Database
//! and service errors surface as one-line messages, never stack traces.

pub mod commands;
pub mod output;

pub use commands::AppContext;

use clap::{Parser, Subcommand};

use crate::domain::errors::DomainError;

/// Abathur - agentic swarm orchestrator.
#[derive(Debug, Parser)]
#[command(name = "abathur", version, about)]
pub struct Cli {
    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Database path override (defaults to configuration)
    #[arg(long, global = true, env = "ABATHUR_DATABASE_PATH")]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Task queue operations
    #[command(subcommand)]
    Task(commands::task::TaskCommands),

    /// Long-term memory operations
    #[command(subcommand)]
    Mem(commands::memory::MemCommands),

    /// MCP server lifecycle
    #[command(subcommand)]
    Mcp(commands::mcp::McpCommands),
}

/// A CLI failure with its intended exit code.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: u8,
}

impl CliError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: 2,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: 1,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<DomainError> for CliError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::ValidationFailed(_)
            | DomainError::InvalidEnumValue { .. }
            | DomainError::CircularDependency { .. }
            | DomainError::InvalidStateTransition { .. } => Self::validation(err.to_string()),
            DomainError::Database(db) => Self::runtime(db.friendly_message()),
            _ => Self::runtime(err.to_string()),
        }
    }
}

impl From<crate::infrastructure::database::DatabaseError> for CliError {
    fn from(err: crate::infrastructure::database::DatabaseError) -> Self {
        Self::runtime(err.friendly_message())
    }
}

/// Parse an age filter of the form `Nd`, `Nw`, `Nm`, or `Ny` into days.
pub fn parse_older_than(s: &str) -> Result<u32, CliError> {
    let s = s.trim();
    if s.len() < 2 {
        return Err(CliError::validation(format!(
            "invalid age filter {s:?}: expected <N>d, <N>w, <N>m, or <N>y"
        )));
    }

    let (number, unit) = s.split_at(s.len() - 1);
    let value: u32 = number.parse().map_err(|_| {
        CliError::validation(format!("invalid age filter {s:?}: {number:?} is not a number"))
    })?;

    let days = match unit {
        "d" => value,
        "w" => value * 7,
        "m" => value * 30,
        "y" => value * 365,
        _ => {
            return Err(CliError::validation(format!(
                "invalid age filter unit {unit:?}: expected d, w, m, or y"
            )))
        }
    };
    Ok(days)
}
