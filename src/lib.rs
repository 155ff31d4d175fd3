//! Abathur - agentic swarm orchestrator.
//!
//! A task queue and agent-swarm orchestration core:
//! - persistent, priority-aware, dependency-resolving scheduler
//! - SQLite storage with WAL mode, cascades, and audit trail
//! - bounded-concurrency swarm dispatcher over an injected executor
//! - sessions, versioned long-term memory, MCP sub-process supervision

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use infrastructure::database::Database;
