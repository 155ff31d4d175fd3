//! Configuration loading with hierarchical merging.
//!
//! Precedence, lowest to highest: programmatic defaults, project
//! template (`.abathur/config.yaml`), user overrides
//! (`~/.abathur/config.yaml`), project-local overrides
//! (`.abathur/local.yaml`), and `ABATHUR_*` environment variables.
//! Credentials resolve separately: env var, OS keychain, project `.env`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::Config;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid queue max_size: {0}. Must be at least 1")]
    InvalidQueueSize(u32),

    #[error("API key not found. Set ANTHROPIC_API_KEY, store it in the keychain, or add it to .env")]
    ApiKeyNotFound,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Persists refreshed OAuth tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn set_oauth_token(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Stored OAuth token bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Configuration loader and credential resolver.
pub struct ConfigManager {
    project_root: PathBuf,
}

impl ConfigManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn from_current_dir() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Load configuration with hierarchical merging.
    pub fn load(&self) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        figment = figment.merge(Yaml::file(self.project_root.join(".abathur/config.yaml")));

        if let Some(home) = std::env::var_os("HOME") {
            figment = figment.merge(Yaml::file(Path::new(&home).join(".abathur/config.yaml")));
        }

        figment = figment
            .merge(Yaml::file(self.project_root.join(".abathur/local.yaml")))
            .merge(Env::prefixed("ABATHUR_").split("__"));

        let mut config: Config = figment
            .extract()
            .context("Failed to extract configuration")?;

        Self::apply_flat_env_aliases(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Flat legacy aliases kept for operator muscle memory; they beat
    /// the nested `ABATHUR_SECTION__KEY` form.
    fn apply_flat_env_aliases(config: &mut Config) {
        if let Ok(level) = std::env::var("ABATHUR_LOG_LEVEL") {
            config.logging.level = level.to_lowercase();
        }
        if let Ok(value) = std::env::var("ABATHUR_QUEUE_MAX_SIZE") {
            if let Ok(size) = value.parse() {
                config.queue.max_size = size;
            }
        }
        if let Ok(value) = std::env::var("ABATHUR_MAX_CONCURRENT_AGENTS") {
            if let Ok(agents) = value.parse() {
                config.swarm.max_concurrent_agents = agents;
            }
        }
        if let Ok(value) = std::env::var("ABATHUR_MAX_ITERATIONS") {
            if let Ok(iterations) = value.parse() {
                config.loop_config.max_iterations = iterations;
            }
        }
    }

    /// Validate a loaded configuration.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.swarm.max_concurrent_agents == 0 || config.swarm.max_concurrent_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(
                config.swarm.max_concurrent_agents,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.queue.max_size == 0 {
            return Err(ConfigError::InvalidQueueSize(config.queue.max_size));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        for server in &config.mcp_servers {
            if server.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "MCP server name cannot be empty".to_string(),
                ));
            }
            if server.command.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "MCP server '{}' command cannot be empty",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve the API key: env var, then OS keychain, then `.env`.
    pub fn get_api_key(&self) -> Result<String, ConfigError> {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                return Ok(key);
            }
        }

        if let Some(key) = Self::keychain_lookup() {
            return Ok(key);
        }

        if let Some(key) = self.dotenv_lookup("ANTHROPIC_API_KEY") {
            return Ok(key);
        }

        Err(ConfigError::ApiKeyNotFound)
    }

    /// Probe the platform keychain through its CLI. Absent tooling or a
    /// missing entry is not an error, just a miss.
    fn keychain_lookup() -> Option<String> {
        let output = if cfg!(target_os = "macos") {
            std::process::Command::new("security")
                .args([
                    "find-generic-password",
                    "-s",
                    "abathur",
                    "-a",
                    "anthropic_api_key",
                    "-w",
                ])
                .output()
                .ok()?
        } else {
            std::process::Command::new("secret-tool")
                .args(["lookup", "service", "abathur", "key", "anthropic_api_key"])
                .output()
                .ok()?
        };

        if !output.status.success() {
            return None;
        }
        let key = String::from_utf8(output.stdout).ok()?.trim().to_string();
        if key.is_empty() {
            None
        } else {
            debug!("api key resolved from keychain");
            Some(key)
        }
    }

    /// Read a value from the project `.env` file.
    fn dotenv_lookup(&self, name: &str) -> Option<String> {
        let content = std::fs::read_to_string(self.project_root.join(".env")).ok()?;
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == name {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
        None
    }

    fn credentials_path(&self) -> PathBuf {
        self.project_root.join(".abathur/credentials.json")
    }

    /// Load stored OAuth tokens, if any.
    pub fn get_oauth_tokens(&self) -> Option<OAuthTokens> {
        let content = std::fs::read_to_string(self.credentials_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(error = %e, "stored oauth credentials unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl TokenStore for ConfigManager {
    async fn set_oauth_token(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let tokens = OAuthTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
        };

        let path = self.credentials_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&tokens)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "oauth tokens persisted");
        Ok(())
    }
}
