//! Long-term memory service.
//!
//! Versioned entries under hierarchical colon-separated namespaces.
//! Every mutation commits its audit row in the same transaction as the
//! memory row.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::memory::validate_namespace;
use crate::domain::models::{MemoryEntry, MemoryType};
use crate::infrastructure::database::MemoryRepo;

/// Default TTL for episodic memory cleanup.
pub const DEFAULT_EPISODIC_TTL_DAYS: u32 = 90;

/// Service for managing long-term memory storage and retrieval.
pub struct MemoryService {
    repo: Arc<MemoryRepo>,
}

impl MemoryService {
    pub fn new(repo: Arc<MemoryRepo>) -> Self {
        Self { repo }
    }

    /// Add a new memory entry at version 1. Emits a `memory_create`
    /// audit row in the same transaction.
    #[instrument(skip(self, value, metadata), err)]
    pub async fn add_memory(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        memory_type: MemoryType,
        created_by: &str,
        task_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> DomainResult<i64> {
        validate_namespace(namespace)?;

        let memory_id = self
            .repo
            .insert(
                namespace,
                key,
                &value,
                memory_type,
                created_by,
                task_id,
                metadata.as_ref(),
            )
            .await?;

        info!(namespace, key, memory_id, "memory created");
        Ok(memory_id)
    }

    /// Retrieve the latest non-deleted version, or a specific version
    /// when one is given explicitly.
    pub async fn get_memory(
        &self,
        namespace: &str,
        key: &str,
        version: Option<i64>,
    ) -> DomainResult<Option<MemoryEntry>> {
        Ok(self.repo.get(namespace, key, version).await?)
    }

    /// Update by inserting a new version (max active version + 1).
    /// Emits a `memory_update` audit row in the same transaction.
    #[instrument(skip(self, value), err)]
    pub async fn update_memory(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        updated_by: &str,
        task_id: Option<&str>,
    ) -> DomainResult<i64> {
        validate_namespace(namespace)?;
        let memory_id = self
            .repo
            .insert_new_version(namespace, key, &value, updated_by, task_id)
            .await?;
        info!(namespace, key, memory_id, "memory updated");
        Ok(memory_id)
    }

    /// Soft-delete the active versions of (namespace, key). Emits a
    /// `memory_delete` audit row. Returns false when nothing was active.
    #[instrument(skip(self), err)]
    pub async fn delete_memory(
        &self,
        namespace: &str,
        key: &str,
        task_id: Option<&str>,
    ) -> DomainResult<bool> {
        let deleted = self.repo.soft_delete(namespace, key, task_id).await?;
        if deleted {
            info!(namespace, key, "memory soft-deleted");
        }
        Ok(deleted)
    }

    /// Prefix search (`user:alice` matches `user:alice:*`), latest
    /// updated first.
    pub async fn search_memories(
        &self,
        namespace_prefix: &str,
        memory_type: Option<MemoryType>,
        limit: u32,
    ) -> DomainResult<Vec<MemoryEntry>> {
        Ok(self.repo.search(namespace_prefix, memory_type, limit).await?)
    }

    /// All distinct active namespaces.
    pub async fn list_namespaces(&self) -> DomainResult<Vec<String>> {
        Ok(self.repo.list_namespaces().await?)
    }

    /// Every version of (namespace, key) in version-descending order,
    /// soft-deleted versions included.
    pub async fn get_memory_history(
        &self,
        namespace: &str,
        key: &str,
    ) -> DomainResult<Vec<MemoryEntry>> {
        Ok(self.repo.history(namespace, key).await?)
    }

    /// Soft-delete entries under a namespace prefix, optionally filtered
    /// by type and age. Returns the number of rows pruned.
    #[instrument(skip(self), err)]
    pub async fn prune_memories(
        &self,
        namespace_prefix: &str,
        memory_type: Option<MemoryType>,
        older_than_days: Option<u32>,
    ) -> DomainResult<u64> {
        let count = self
            .repo
            .soft_delete_matching(namespace_prefix, memory_type, older_than_days)
            .await?;
        if count > 0 {
            info!(namespace_prefix, count, "memories pruned");
        }
        Ok(count)
    }

    /// Soft-delete episodic memories older than the TTL. Returns the
    /// number of rows expired.
    #[instrument(skip(self), err)]
    pub async fn cleanup_expired_memories(&self, ttl_days: u32) -> DomainResult<u64> {
        let count = self.repo.cleanup_expired(ttl_days).await?;
        if count > 0 {
            info!(count, ttl_days, "expired episodic memories cleaned up");
        }
        Ok(count)
    }
}
