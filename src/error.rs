//! Error types for genqueue
//!
//! Centralized error handling using thiserror. Execution failures reported by
//! the backend live in [`crate::executor::ExecutionError`]; this enum covers
//! everything the queue itself can reject.

use thiserror::Error;

/// All error types the queue surfaces to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Capacity reached at submission
    #[error("Queue full: capacity of {capacity} tasks reached")]
    QueueFull { capacity: usize },

    /// Operation on an unknown task id
    #[error("Task not found: {0}")]
    NotFound(String),

    /// State machine refused the operation (e.g. cancelling a processing task)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Submitted input rejected before it reached the store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration misuse, fatal at startup
    #[error("Config error: {0}")]
    Config(String),
}

impl QueueError {
    /// True for errors that describe a single task rather than the queue
    pub fn is_task_scoped(&self) -> bool {
        matches!(self, QueueError::NotFound(_) | QueueError::InvalidState(_))
    }
}

/// Result type alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
