//! Execution seam between the queue and the backend that does the work.
//!
//! This module provides:
//! - Executor trait for the backend capability
//! - ProgressReporter, the one-way progress channel back to the queue
//! - ErrorKind / ExecutionError failure classification
//! - TimeoutExecutor, a deadline wrapper for any executor
//! - SimulatedExecutor for demos and tests

pub mod classify;
pub mod simulated;
pub mod timeout;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use classify::{ErrorKind, ExecutionError};
pub use simulated::{SimulatedExecutor, SimulatedOutcome};
pub use timeout::TimeoutExecutor;

/// Backend capability: run one input to completion
///
/// Implementations must eventually settle. Long-running work should report
/// progress through the supplied reporter.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, input: &str, progress: ProgressReporter) -> Result<ExecutionOutput, ExecutionError>;
}

/// Successful execution output
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    /// Backend payload, stored verbatim on the task
    pub payload: serde_json::Value,
    /// Time the backend spent, in milliseconds
    pub duration_ms: u64,
}

impl ExecutionOutput {
    pub fn new(payload: serde_json::Value, duration_ms: u64) -> Self {
        Self { payload, duration_ms }
    }
}

/// Progress notifications from a running execution
///
/// Reporting never blocks and never fails; updates sent after the queue
/// stopped listening are dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<u8>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiving end the queue drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Report progress in percent; values above 100 are clamped
    pub fn report(&self, percent: u8) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(percent.min(100));
        }
    }
}
