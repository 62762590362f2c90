//! Failure classification for executor errors.
//!
//! Transport trouble and upstream overload are worth retrying; requests the
//! backend rejected on their merits are not.

use serde::{Deserialize, Serialize};

use crate::domain::TaskError;

/// Broad category of an execution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request or backend exceeded its deadline
    Timeout,
    /// Connection refused, reset, DNS failure
    Connection,
    /// Upstream throttling (429)
    RateLimited,
    /// Upstream 5xx
    Server,
    /// Malformed or rejected input
    InvalidInput,
    /// Missing or rejected credentials
    Unauthorized,
    /// Model or resource does not exist
    NotFound,
    /// Anything unrecognized
    Other,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Timeout => true,
            ErrorKind::Connection => true,
            ErrorKind::RateLimited => true,
            ErrorKind::Server => true,
            ErrorKind::InvalidInput => false,
            ErrorKind::Unauthorized => false,
            ErrorKind::NotFound => false,
            ErrorKind::Other => false,
        }
    }

    /// Error code recorded on the task
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Other => "UNKNOWN_ERROR",
        }
    }

    /// Map an HTTP-equivalent status code
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 504 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Server,
            400 | 422 => ErrorKind::InvalidInput,
            401 | 403 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

/// Failure reported by an executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ExecutionError {
    /// Build an error whose retryability follows its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    /// Build an error with an explicit verdict, for backends with their own classifier
    pub fn with_retryable(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_status(status), message)
    }
}

impl From<&ExecutionError> for TaskError {
    fn from(err: &ExecutionError) -> Self {
        TaskError::new(err.code.clone(), err.message.clone())
    }
}
