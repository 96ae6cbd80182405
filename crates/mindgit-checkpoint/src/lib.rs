//! # mindgit-checkpoint - Checkpoint Records and Storage Backends
//!
//! **Trait-based storage abstractions and implementations** for persisting agent
//! reasoning checkpoints. A checkpoint is an immutable snapshot of an agent's
//! working state at one reasoning step; this crate defines the record types,
//! the serialization protocol that gives every record a content fingerprint,
//! and the [`CheckpointStore`] trait with three interchangeable backends.
//!
//! ## Overview
//!
//! - [`Checkpoint`] / [`Branch`] - the record types (see [`checkpoint`])
//! - [`StateSerializer`] - canonical bytes + content fingerprints (see [`serializer`])
//! - [`CheckpointStore`] - the backend interface (see [`traits`])
//! - [`MemoryStore`] - ephemeral reference implementation
//! - [`FileTreeStore`] - one JSON file per record, atomic writes
//! - [`SqliteStore`] - embedded relational storage via sqlx
//!
//! All three backends are required to produce identical observable behavior
//! for the same operation sequence: same `list()` ordering (timestamp
//! ascending, insertion order on ties), same status-transition enforcement,
//! same idempotency under repeated identical calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mindgit_checkpoint::{Checkpoint, CheckpointFilter, CheckpointStore, MemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!
//!     let mut state = serde_json::Map::new();
//!     state.insert("task".into(), json!("summarize"));
//!     let cp = Checkpoint::builder("main")
//!         .state(state)
//!         .description("task received")
//!         .logic_step("intake")
//!         .build();
//!
//!     store.put(&cp).await?;
//!     let loaded = store.get(&cp.id).await?;
//!     assert!(loaded.is_some());
//!
//!     let all = store.list(&CheckpointFilter::default()).await?;
//!     assert_eq!(all.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod fs;
pub mod memory;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{Branch, Checkpoint, CheckpointBuilder, CheckpointFilter, CheckpointStatus, StateMap};
pub use error::{Result, StoreError};
pub use fs::FileTreeStore;
pub use memory::MemoryStore;
pub use serializer::{
    canonical_json, fingerprint, BincodeSerializer, GzipSerializer, JsonSerializer, SerializerKind,
    StateSerializer,
};
pub use sqlite::SqliteStore;
pub use traits::CheckpointStore;
