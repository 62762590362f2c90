//! Deadline wrapper for executors.
//!
//! The queue never times out an execution on its own; backends that cannot
//! enforce a deadline themselves get wrapped in a [`TimeoutExecutor`].

use std::time::Duration;

use async_trait::async_trait;

use super::{ExecutionError, ExecutionOutput, Executor, ProgressReporter};

/// Fails an execution with a retryable `TIMEOUT` once `timeout` elapses
pub struct TimeoutExecutor<E> {
    inner: E,
    timeout: Duration,
}

impl<E: Executor> TimeoutExecutor<E> {
    pub fn new(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<E: Executor> Executor for TimeoutExecutor<E> {
    async fn execute(&self, input: &str, progress: ProgressReporter) -> Result<ExecutionOutput, ExecutionError> {
        match tokio::time::timeout(self.timeout, self.inner.execute(input, progress)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Execution timed out");
                Err(ExecutionError::timeout(format!(
                    "execution exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SimulatedExecutor, SimulatedOutcome};

    #[tokio::test]
    async fn test_timeout_maps_to_retryable_error() {
        let inner = SimulatedExecutor::instant();
        inner.script("slow", [SimulatedOutcome::Hang]);
        let exec = TimeoutExecutor::new(inner, Duration::from_millis(20));
        assert_eq!(exec.timeout(), Duration::from_millis(20));

        let err = exec.execute("slow", ProgressReporter::noop()).await.unwrap_err();
        assert_eq!(err.code, "TIMEOUT");
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_fast_execution_passes_through() {
        let exec = TimeoutExecutor::new(SimulatedExecutor::instant(), Duration::from_secs(5));
        let out = exec.execute("quick", ProgressReporter::noop()).await.unwrap();
        assert_eq!(out.payload["input"], "quick");
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let inner = SimulatedExecutor::instant();
        inner.script("bad", [SimulatedOutcome::Fail(crate::executor::ErrorKind::Unauthorized)]);
        let exec = TimeoutExecutor::new(inner, Duration::from_secs(5));

        let err = exec.execute("bad", ProgressReporter::noop()).await.unwrap_err();
        assert_eq!(err.code, "UNAUTHORIZED");
        assert!(!err.retryable);
    }
}
