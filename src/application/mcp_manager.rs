//! MCP server lifecycle management.
//!
//! Owns a map of named sub-processes, each walking the state machine
//! STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED (or FAILED).
//! A background health loop polls exit codes and auto-restarts crashed
//! servers. All lifecycle operations are idempotent.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::McpServerConfig;

/// MCP server states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl McpServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for McpServerState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(Self::Stopped),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::InvalidEnumValue {
                kind: "McpServerState",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for McpServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running (or failed) MCP server process.
struct McpServerProcess {
    state: McpServerState,
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

/// Externally visible status of one server.
#[derive(Debug, Clone, Serialize)]
pub struct McpServerStatus {
    pub name: String,
    pub command: String,
    pub state: McpServerState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Manages MCP server sub-process lifecycles.
pub struct McpManager {
    servers: HashMap<String, McpServerConfig>,
    processes: RwLock<HashMap<String, McpServerProcess>>,
    health_handle: Mutex<Option<JoinHandle<()>>>,
    health_shutdown: broadcast::Sender<()>,
}

impl McpManager {
    /// Grace period between SIGTERM and SIGKILL on stop.
    const STOP_GRACE: Duration = Duration::from_secs(5);

    /// Default health check interval.
    pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(server_configs: Vec<McpServerConfig>) -> Self {
        let (health_shutdown, _) = broadcast::channel(1);
        Self {
            servers: server_configs
                .into_iter()
                .map(|config| (config.name.clone(), config))
                .collect(),
            processes: RwLock::new(HashMap::new()),
            health_handle: Mutex::new(None),
            health_shutdown,
        }
    }

    /// Names of all configured servers.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a server. Already running is success.
    pub async fn start_server(self: &Arc<Self>, server_name: &str) -> bool {
        let Some(config) = self.servers.get(server_name) else {
            error!(server = server_name, "mcp server not found");
            return false;
        };

        {
            let processes = self.processes.read().await;
            if let Some(process) = processes.get(server_name) {
                if matches!(process.state, McpServerState::Running | McpServerState::Starting) {
                    warn!(server = server_name, "mcp server already running");
                    return true;
                }
            }
        }

        info!(server = server_name, command = %config.command, "starting mcp server");

        let mut entry = McpServerProcess {
            state: McpServerState::Starting,
            child: None,
            started_at: None,
            last_health_check: None,
            error_message: None,
        };

        let spawned = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match spawned {
            Ok(child) => {
                let pid = child.id();
                entry.child = Some(child);
                entry.state = McpServerState::Running;
                entry.started_at = Some(Utc::now());
                self.processes
                    .write()
                    .await
                    .insert(server_name.to_string(), entry);

                info!(server = server_name, ?pid, "mcp server started");

                // First start also kicks off health monitoring
                self.start_health_monitoring(Self::DEFAULT_HEALTH_INTERVAL)
                    .await;
                true
            }
            Err(e) => {
                error!(server = server_name, error = %e, "mcp server start failed");
                entry.state = McpServerState::Failed;
                entry.error_message = Some(e.to_string());
                self.processes
                    .write()
                    .await
                    .insert(server_name.to_string(), entry);
                false
            }
        }
    }

    /// Stop a server: SIGTERM, wait up to 5 s, then SIGKILL.
    /// Not running is success.
    pub async fn stop_server(&self, server_name: &str) -> bool {
        let mut process = {
            let mut processes = self.processes.write().await;
            match processes.remove(server_name) {
                Some(process) => process,
                None => {
                    warn!(server = server_name, "mcp server not running");
                    return true;
                }
            }
        };

        info!(server = server_name, "stopping mcp server");
        process.state = McpServerState::Stopping;

        if let Some(mut child) = process.child.take() {
            if let Some(pid) = child.id() {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(server = server_name, error = %e, "SIGTERM failed");
                }
            }

            match tokio::time::timeout(Self::STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(server = server_name, ?status, "mcp server exited");
                }
                Ok(Err(e)) => {
                    error!(server = server_name, error = %e, "error waiting for exit");
                }
                Err(_) => {
                    warn!(server = server_name, "graceful stop timed out, killing");
                    if let Err(e) = child.kill().await {
                        error!(server = server_name, error = %e, "kill failed");
                        return false;
                    }
                }
            }
        }

        info!(server = server_name, "mcp server stopped");
        true
    }

    /// Restart a server (stop, brief pause, start).
    pub async fn restart_server(self: &Arc<Self>, server_name: &str) -> bool {
        info!(server = server_name, "restarting mcp server");
        self.stop_server(server_name).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.start_server(server_name).await
    }

    /// Start every configured server. Returns per-server success.
    pub async fn start_all_servers(self: &Arc<Self>) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for name in self.server_names() {
            let success = self.start_server(&name).await;
            results.insert(name, success);
        }
        results
    }

    /// Stop every running server (health monitoring first).
    pub async fn stop_all_servers(&self) -> HashMap<String, bool> {
        self.stop_health_monitoring().await;

        let names: Vec<String> = self.processes.read().await.keys().cloned().collect();
        let mut results = HashMap::new();
        for name in names {
            let success = self.stop_server(&name).await;
            results.insert(name, success);
        }
        results
    }

    /// Start the background health loop (no-op if already running).
    ///
    /// Returns a boxed future (rather than `async fn`) to break the
    /// otherwise-infinite opaque type that would result from the
    /// start_health_monitoring -> check_server_health -> restart_server
    /// -> start_server -> start_health_monitoring call cycle.
    pub fn start_health_monitoring(
        self: &Arc<Self>,
        check_interval: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut handle_slot = self.health_handle.lock().await;
            if handle_slot.as_ref().is_some_and(|h| !h.is_finished()) {
                return;
            }

            let this = Arc::clone(self);
            let mut shutdown_rx = self.health_shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(check_interval);
                interval.tick().await; // first tick fires immediately

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            this.check_server_health().await;
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("health check loop shutting down");
                            break;
                        }
                    }
                }
            });

            *handle_slot = Some(handle);
            info!(interval_secs = check_interval.as_secs(), "mcp health monitoring started");
        })
    }

    /// Cancel the health loop cleanly.
    pub async fn stop_health_monitoring(&self) {
        let handle = self.health_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = self.health_shutdown.send(());
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "health loop join failed");
                }
            }
            info!("mcp health monitoring stopped");
        }
    }

    /// Poll every RUNNING server's exit code; a dead process is marked
    /// FAILED and restarted.
    async fn check_server_health(self: &Arc<Self>) {
        let mut dead = Vec::new();
        {
            let mut processes = self.processes.write().await;
            for (name, process) in processes.iter_mut() {
                if process.state != McpServerState::Running {
                    continue;
                }
                let Some(child) = process.child.as_mut() else {
                    continue;
                };

                match child.try_wait() {
                    Ok(Some(status)) => {
                        error!(server = name, ?status, "mcp server died");
                        process.state = McpServerState::Failed;
                        process.error_message =
                            Some(format!("Process exited with status {status}"));
                        dead.push(name.clone());
                    }
                    Ok(None) => {
                        process.last_health_check = Some(Utc::now());
                    }
                    Err(e) => {
                        warn!(server = name, error = %e, "health poll failed");
                    }
                }
            }
        }

        for name in dead {
            info!(server = %name, "auto-restarting crashed mcp server");
            self.restart_server(&name).await;
        }
    }

    /// Status of one server, None when unknown.
    pub async fn get_server_status(&self, server_name: &str) -> Option<McpServerStatus> {
        let config = self.servers.get(server_name)?;
        let processes = self.processes.read().await;
        let process = processes.get(server_name);

        Some(McpServerStatus {
            name: server_name.to_string(),
            command: config.command.clone(),
            state: process.map_or(McpServerState::Stopped, |p| p.state),
            pid: process.and_then(|p| p.child.as_ref().and_then(Child::id)),
            started_at: process.and_then(|p| p.started_at),
            last_health_check: process.and_then(|p| p.last_health_check),
            error_message: process.and_then(|p| p.error_message.clone()),
        })
    }

    /// Status of every configured server.
    pub async fn get_all_server_status(&self) -> Vec<McpServerStatus> {
        let mut statuses = Vec::new();
        for name in self.server_names() {
            if let Some(status) = self.get_server_status(&name).await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// Stop everything.
    pub async fn shutdown(&self) {
        info!("mcp manager shutting down");
        self.stop_all_servers().await;
        info!("mcp manager shutdown complete");
    }
}
