//! In-memory checkpoint storage for development and testing
//!
//! [`MemoryStore`] is the reference implementation of [`CheckpointStore`]:
//! plain maps behind a `tokio::sync::RwLock`, lost on process exit, empty on
//! construction. Cloning shares the underlying storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::checkpoint::{Branch, Checkpoint, CheckpointFilter, CheckpointStatus};
use crate::error::{Result, StoreError};
use crate::traits::CheckpointStore;

#[derive(Debug, Default)]
struct MemoryInner {
    checkpoints: HashMap<String, Checkpoint>,
    /// Ids in insertion order; the tie-breaker for `list`.
    order: Vec<String>,
    branches: HashMap<String, Branch>,
}

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored checkpoints.
    pub async fn checkpoint_count(&self) -> usize {
        self.inner.read().await.checkpoints.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.checkpoints.contains_key(&checkpoint.id) {
            inner.order.push(checkpoint.id.clone());
        }
        inner
            .checkpoints
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.inner.read().await.checkpoints.get(id).cloned())
    }

    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.read().await;
        let mut result: Vec<Checkpoint> = inner
            .order
            .iter()
            .filter_map(|id| inner.checkpoints.get(id))
            .filter(|cp| filter.matches(cp))
            .cloned()
            .collect();
        // `order` is insertion order; a stable sort keeps it as the
        // tie-breaker for equal timestamps.
        result.sort_by_key(|cp| cp.timestamp);
        Ok(result)
    }

    async fn update_status(&self, id: &str, status: CheckpointStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let cp = inner
            .checkpoints
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !cp.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: cp.status,
                to: status,
            });
        }
        cp.status = status;
        Ok(())
    }

    async fn put_branch(&self, branch: &Branch) -> Result<()> {
        self.inner
            .write()
            .await
            .branches
            .insert(branch.name.clone(), branch.clone());
        Ok(())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self.inner.read().await.branches.get(name).cloned())
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let inner = self.inner.read().await;
        let mut branches: Vec<Branch> = inner.branches.values().cloned().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        self.inner.write().await.branches.remove(name);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.checkpoints.clear();
        inner.order.clear();
        inner.branches.clear();
        Ok(())
    }
}
