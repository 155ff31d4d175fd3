//! Long-term memory entries.
//!
//! Memory is namespaced (`user:alice:preferences`), versioned per
//! (namespace, key), and soft-deleted. Reads answer with the latest
//! non-deleted version; prior versions are retained for history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Kind of knowledge a memory entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Facts and stable knowledge
    Semantic,
    /// Experiences tied to a point in time; subject to TTL cleanup
    Episodic,
    /// Rules and instructions
    Procedural,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
            Self::Procedural => "procedural",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "semantic" => Ok(Self::Semantic),
            "episodic" => Ok(Self::Episodic),
            "procedural" => Ok(Self::Procedural),
            other => Err(DomainError::InvalidEnumValue {
                kind: "MemoryType",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of a memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Row id (auto-increment)
    pub id: i64,
    /// Hierarchical colon-separated namespace
    pub namespace: String,
    /// Key within the namespace
    pub key: String,
    /// JSON content
    pub value: serde_json::Value,
    pub memory_type: MemoryType,
    /// Monotonically increasing per (namespace, key)
    pub version: i64,
    pub metadata: serde_json::Value,
    /// Soft-delete flag; deleted versions never answer reads
    pub is_deleted: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validate a hierarchical namespace string.
///
/// Namespaces are opaque strings with a `:` delimiter convention
/// (`user:<uid>:...`, `session:<sid>:...`, `app:<name>:...`,
/// `project:<pid>:...`, `task:<tid>:...`, `temp:...`); the only hard
/// requirement is at least one separator.
pub fn validate_namespace(namespace: &str) -> Result<(), DomainError> {
    if !namespace.contains(':') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid namespace format: {namespace}. Must contain ':' separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_round_trip() {
        for mt in [MemoryType::Semantic, MemoryType::Episodic, MemoryType::Procedural] {
            let parsed: MemoryType = mt.as_str().parse().unwrap();
            assert_eq!(parsed, mt);
        }
        assert!("vague".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_namespace_validation() {
        assert!(validate_namespace("user:alice:preferences").is_ok());
        assert!(validate_namespace("temp:scratch").is_ok());
        assert!(validate_namespace("flat").is_err());
    }
}
