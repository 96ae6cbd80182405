//! # mindgit-core - Checkpoint DAG Engine and Safe Execution
//!
//! The engine layer of mindgit: a branching, content-addressed DAG of agent
//! reasoning states with git-like operations, plus an execution wrapper
//! that checkpoints before every risky call and restores on failure.
//!
//! ## Overview
//!
//! - [`Session`] - the façade: checkpoint, rollback, branch, switch, merge,
//!   diff, history, visualize, export/import, metrics
//! - [`Session::safe_execute`] - the save → run → rollback/retry/fallback
//!   loop, driven by a chain of [`RecoveryStrategy`] policies
//! - [`strategies`] - [`RetryWithBackoff`], [`AlternativePath`],
//!   [`DegradeGracefully`], [`CompositeStrategy`]
//! - [`Middleware`] / [`Session::scoped`] - integration ergonomics for host
//!   frameworks
//!
//! Persistence is pluggable through `mindgit_checkpoint::CheckpointStore`;
//! every mutating operation writes through to the backend before touching
//! the in-memory DAG.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mindgit_core::{ExecuteOptions, Session};
//! use mindgit_core::strategies::RetryWithBackoff;
//! use mindgit_checkpoint::StateMap;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new("research-agent").await?;
//!
//!     let mut state = StateMap::new();
//!     state.insert("task".into(), json!("analyze dataset"));
//!
//!     let (result, checkpoint) = session
//!         .safe_execute(
//!             |state| async move { Ok(state) },
//!             state,
//!             ExecuteOptions::new("analysis")
//!                 .with_strategy(Arc::new(RetryWithBackoff::default()))
//!                 .with_fallback(|state| async move { Ok(state) }),
//!         )
//!         .await?;
//!
//!     println!("recorded as {} -> {:?}", checkpoint.id, result);
//!     Ok(())
//! }
//! ```

pub mod dag;
pub mod diff;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod middleware;
pub mod session;
pub mod strategies;

pub use diff::{StateDiff, ValueChange};
pub use error::{EngineError, Result, StepError};
pub use executor::{ExecuteOptions, FallbackFn};
pub use metrics::SessionMetrics;
pub use middleware::Middleware;
pub use session::{BranchInfo, ExportDocument, MergeStrategy, Session};
pub use strategies::{
    AlternativePath, CompositeStrategy, DegradeGracefully, RecoveryDecision, RecoveryStrategy,
    RetryWithBackoff,
};

// Commonly re-used record types from the storage layer.
pub use mindgit_checkpoint::{Branch, Checkpoint, CheckpointStatus, StateMap};
