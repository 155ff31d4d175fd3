//! Application configuration model.
//!
//! Loaded hierarchically by `infrastructure::config::ConfigLoader`;
//! defaults here are the lowest-precedence layer.

use serde::{Deserialize, Serialize};

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: u32,
    pub default_priority: u8,
    pub retry_attempts: u32,
    /// Initial retry backoff (duration string, e.g. "10s")
    pub retry_backoff_initial: String,
    /// Retry backoff cap (duration string, e.g. "5m")
    pub retry_backoff_max: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_priority: 5,
            retry_attempts: 3,
            retry_backoff_initial: "10s".to_string(),
            retry_backoff_max: "5m".to_string(),
        }
    }
}

/// Swarm orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub max_concurrent_agents: usize,
    /// Seconds between ready-task polls
    pub poll_interval_secs: f64,
    pub agent_spawn_timeout: String,
    pub agent_idle_timeout: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 10,
            poll_interval_secs: 2.0,
            agent_spawn_timeout: "5s".to_string(),
            agent_idle_timeout: "5m".to_string(),
        }
    }
}

/// Loop execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub default_timeout: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            default_timeout: "1h".to_string(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".abathur/abathur.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// "auto" | "api_key" | "oauth"
    pub mode: String,
    pub auto_refresh: bool,
    pub refresh_retries: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            auto_refresh: true,
            refresh_retries: 3,
        }
    }
}

/// One configured MCP sub-process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub swarm: SwarmConfig,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Parse a duration string of the form "10s", "5m", "1h", "2d".
///
/// Bare numbers are treated as seconds.
pub fn parse_duration(s: &str) -> Result<std::time::Duration, crate::domain::errors::DomainError> {
    use crate::domain::errors::DomainError;

    let s = s.trim();
    if s.is_empty() {
        return Err(DomainError::ValidationFailed(
            "empty duration string".to_string(),
        ));
    }

    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: u64 = number.parse().map_err(|_| {
        DomainError::ValidationFailed(format!("unparseable duration: {s:?}"))
    })?;

    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => {
            return Err(DomainError::ValidationFailed(format!(
                "unparseable duration unit in {s:?} (expected s, m, h, or d)"
            )))
        }
    };

    Ok(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_size, 1000);
        assert_eq!(config.queue.retry_backoff_initial, "10s");
        assert_eq!(config.queue.retry_backoff_max, "5m");
        assert_eq!(config.swarm.max_concurrent_agents, 10);
        assert_eq!(config.database.path, ".abathur/abathur.db");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap().as_secs(), 10);
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("1h").unwrap().as_secs(), 3600);
        assert_eq!(parse_duration("2d").unwrap().as_secs(), 172_800);
        assert_eq!(parse_duration("42").unwrap().as_secs(), 42);
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r"
queue:
  max_size: 50
swarm:
  max_concurrent_agents: 4
  poll_interval_secs: 0.5
logging:
  level: debug
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.queue.max_size, 50);
        assert_eq!(config.swarm.max_concurrent_agents, 4);
        assert_eq!(config.logging.level, "debug");
        // Unspecified sections keep defaults
        assert_eq!(config.queue.retry_attempts, 3);
    }
}
