//! Storage backend trait for checkpoint persistence
//!
//! [`CheckpointStore`] is the single seam between the DAG engine and
//! durability. The crate ships three implementations — [`MemoryStore`],
//! [`FileTreeStore`], and [`SqliteStore`] — and downstream projects can
//! supply their own. The contract every implementation must satisfy:
//!
//! - **Idempotency** - repeating any operation with identical inputs leaves
//!   the store in the same state and succeeds.
//! - **Ordering** - [`list`] returns checkpoints by timestamp ascending,
//!   stable by insertion order on equal timestamps.
//! - **Status machine** - [`update_status`] only admits transitions out of
//!   `active` (plus same-status no-ops); everything else is
//!   [`StoreError::InvalidTransition`].
//! - **Resumability** - reopening an existing store exposes its prior
//!   contents (the in-memory backend is defined to start empty).
//!
//! [`MemoryStore`]: crate::memory::MemoryStore
//! [`FileTreeStore`]: crate::fs::FileTreeStore
//! [`SqliteStore`]: crate::sqlite::SqliteStore
//! [`StoreError::InvalidTransition`]: crate::error::StoreError::InvalidTransition
//! [`list`]: CheckpointStore::list
//! [`update_status`]: CheckpointStore::update_status

use async_trait::async_trait;

use crate::checkpoint::{Branch, Checkpoint, CheckpointFilter, CheckpointStatus};
use crate::error::Result;

/// Durable key/sequence storage for checkpoint and branch records
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Durably store a checkpoint by id. Overwrites an existing record with
    /// the same id (which makes retried writes idempotent).
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Fetch a checkpoint by id, or `None` if unknown.
    async fn get(&self, id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints matching the filter, timestamp ascending, stable by
    /// insertion order on ties.
    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>>;

    /// Move a checkpoint through the one-way status machine.
    async fn update_status(&self, id: &str, status: CheckpointStatus) -> Result<()>;

    /// Store or overwrite a branch record by name.
    async fn put_branch(&self, branch: &Branch) -> Result<()>;

    /// Fetch a branch by name, or `None` if unknown.
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>>;

    /// All branch records, in name order.
    async fn list_branches(&self) -> Result<Vec<Branch>>;

    /// Remove a branch record. Removing an absent branch is a no-op.
    async fn delete_branch(&self, name: &str) -> Result<()>;

    /// Remove all stored state for this store's agent.
    async fn clear(&self) -> Result<()>;
}
