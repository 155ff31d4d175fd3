//! Abathur CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use abathur::application::McpManager;
use abathur::cli::commands::{mcp, memory, task, AppContext};
use abathur::cli::{Cli, CliError, Commands};
use abathur::infrastructure::config::ConfigManager;
use abathur::infrastructure::database::{
    Database, MemoryRepo, SessionRepo, TaskRepo, TreeOperations,
};
use abathur::services::{
    DependencyResolver, MemoryService, PriorityCalculator, SessionService, TaskQueueService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e.message);
            ExitCode::from(e.exit_code)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_manager =
        ConfigManager::from_current_dir().map_err(|e| CliError::runtime(e.to_string()))?;
    let config = config_manager
        .load()
        .map_err(|e| CliError::validation(e.to_string()))?;

    init_tracing(&config.logging.level);

    let db_path = cli.db_path.unwrap_or_else(|| config.database.path.clone());
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| CliError::runtime(e.to_string()))?;
        }
    }

    let database = Database::connect_with_max_connections(
        &format!("sqlite:{db_path}"),
        config.database.max_connections,
    )
    .await?;

    let pool = database.pool().clone();
    let task_repo = Arc::new(TaskRepo::new(pool.clone()));
    let memory_repo = Arc::new(MemoryRepo::new(pool.clone()));
    let session_repo = Arc::new(SessionRepo::new(pool.clone()));

    let resolver = Arc::new(DependencyResolver::new(task_repo.clone()));
    let priority_calc = Arc::new(PriorityCalculator::new(task_repo.clone(), resolver.clone()));
    let task_queue = Arc::new(TaskQueueService::with_config(
        task_repo,
        resolver,
        priority_calc,
        config.queue.clone(),
    ));

    let ctx = AppContext {
        task_queue,
        memory: Arc::new(MemoryService::new(memory_repo)),
        sessions: Arc::new(SessionService::new(session_repo)),
        tree_ops: Arc::new(TreeOperations::new(pool)),
        mcp: Arc::new(McpManager::new(config.mcp_servers.clone())),
    };

    match cli.command {
        Commands::Task(command) => task::handle(&ctx, command, cli.json).await,
        Commands::Mem(command) => memory::handle(&ctx, command, cli.json).await,
        Commands::Mcp(command) => mcp::handle(&ctx, command, cli.json).await,
    }
}

fn init_tracing(level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("abathur={level}"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}
