//! Error types for the checkpoint DAG engine and orchestrator

use thiserror::Error;

use mindgit_checkpoint::StoreError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type produced by user-supplied callables inside `safe_execute`
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the session façade, DAG engine, and orchestrator
#[derive(Error, Debug)]
pub enum EngineError {
    /// Backend or serializer failure; the in-memory DAG is left unchanged
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Checkpoint id that does not exist in this session
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// Rollback target unreachable or too few ancestors
    #[error("rollback error: {0}")]
    Rollback(String),

    /// Branch name conflicts or unknown branch
    #[error("branch error: {0}")]
    Branch(String),

    /// Merge source unknown or empty
    #[error("merge error: {0}")]
    Merge(String),

    /// Export document rejected during import
    #[error("import error: {0}")]
    Import(String),

    /// A protected call failed after retries and fallback
    #[error("execution of '{description}' failed: {source}")]
    Execution {
        description: String,
        #[source]
        source: StepError,
    },

    /// A protected call was cancelled during a retry delay
    #[error("cancelled")]
    Cancelled,
}
