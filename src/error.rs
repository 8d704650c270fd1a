//! Error types for hone
//!
//! Centralized error handling using thiserror. Component-level errors
//! (provider, executor, evaluator, storage) live next to their components
//! and convert into `HoneError` at the session boundary.

use thiserror::Error;

/// All error types that can surface from a hone session
#[derive(Debug, Error)]
pub enum HoneError {
    /// Session not found in the store
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Task failed validation before the session started
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Completion provider error
    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    /// Tool executor error
    #[error("Executor error: {0}")]
    Executor(#[from] crate::executor::ExecutorError),

    /// Criteria evaluator error
    #[error("Evaluator error: {0}")]
    Eval(#[from] crate::evaluator::EvalError),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Workspace path error
    #[error("Workspace error: {0}")]
    Workspace(#[from] crate::workspace::WorkspaceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for hone operations
pub type Result<T> = std::result::Result<T, HoneError>;
