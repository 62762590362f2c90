//! Task record and related types
//!
//! A Task is one unit of queued work and its lifecycle record. Only the
//! [`TaskStore`](crate::store::TaskStore) mutates tasks; everything handed out
//! to callers and observers is a clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The unit of work tracked by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    //=== Identity ===
    /// Unique identifier ("task-1738300800123-00a1b2c3")
    pub id: String,

    /// Opaque payload handed to the executor (the prompt)
    pub input: String,

    //=== Lifecycle ===
    /// Current state
    pub state: TaskState,

    /// Progress of the current attempt (0-100)
    pub progress: u8,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Retry budget captured at creation
    pub max_retries: u32,

    /// When a retrying task becomes eligible for requeue
    pub next_retry_at: Option<DateTime<Utc>>,

    //=== Outcome ===
    /// Set exactly once, on entering Completed
    pub result: Option<TaskResult>,

    /// Last classified failure
    pub error: Option<TaskError>,

    /// Advisory wait estimate in milliseconds
    #[serde(rename = "estimatedWaitTime")]
    pub estimated_wait_ms: Option<u64>,

    //=== Timestamps ===
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a fresh pending task
    pub fn new(id: impl Into<String>, input: impl Into<String>, created_at: DateTime<Utc>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            state: TaskState::Pending,
            progress: 0,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            result: None,
            error: None,
            estimated_wait_ms: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns true once the task reached Completed or Failed
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true while the task holds a processing slot
    pub fn holds_slot(&self) -> bool {
        self.state == TaskState::Processing
    }

    /// Whether another retryable failure may still be retried
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a processing slot
    Pending,
    /// Executing, holds a slot
    Processing,
    /// Failed transiently, waiting for its backoff to elapse
    Retrying,
    /// Finished successfully
    Completed,
    /// Finished with a permanent failure
    Failed,
}

impl TaskState {
    /// Returns true if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Returns true if a cancel request may remove the task
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, TaskState::Processing)
    }

    /// The only edges of the task state machine
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Retrying)
                | (Processing, Failed)
                | (Retrying, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Retrying => "retrying",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful execution output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Backend payload (e.g. image URL and metadata)
    pub payload: serde_json::Value,
    /// Wall time of the successful attempt
    pub duration_ms: u64,
}

/// Classified failure recorded on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

impl TaskError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_is_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
    }

    #[test]
    fn test_task_state_is_cancellable() {
        assert!(TaskState::Pending.is_cancellable());
        assert!(TaskState::Retrying.is_cancellable());
        assert!(!TaskState::Processing.is_cancellable());
    }

    #[test]
    fn test_allowed_transitions() {
        use TaskState::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Retrying));
        assert!(Processing.can_transition_to(Failed));
        assert!(Retrying.can_transition_to(Pending));
    }

    #[test]
    fn test_forbidden_transitions() {
        use TaskState::*;
        let all = [Pending, Processing, Retrying, Completed, Failed];
        let allowed = [
            (Pending, Processing),
            (Processing, Completed),
            (Processing, Retrying),
            (Processing, Failed),
            (Retrying, Pending),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_new_task_defaults() {
        let now = Utc::now();
        let task = Task::new("task-1", "a red fox", now, 5);

        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.created_at, now);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.next_retry_at.is_none());
        assert!(task.has_retries_left());
        assert!(!task.holds_slot());
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let task = Task::new("task-1", "x", Utc::now(), 5);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["maxRetries"], 5);
        assert!(json.get("createdAt").is_some());
        assert!(json["nextRetryAt"].is_null());
    }

    #[test]
    fn test_wait_estimate_wire_name() {
        let mut task = Task::new("task-1", "x", Utc::now(), 5);
        task.estimated_wait_ms = Some(1500);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["estimatedWaitTime"], 1500);
        assert!(json.get("estimatedWaitMs").is_none());

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.estimated_wait_ms, Some(1500));
    }
}
