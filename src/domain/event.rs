//! Queue events streamed to observers.
//!
//! Every state transition produces one of these. On the wire an event is
//! `{"event": "<name>", "data": <payload>}`, which the streaming layer forwards
//! verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::{Task, TaskError};

/// Event name constants
pub mod event_types {
    pub const TASK_SUBMITTED: &str = "task_submitted";
    pub const TASK_STARTED: &str = "task_started";
    pub const TASK_PROGRESS: &str = "task_progress";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const TASK_RETRY_SCHEDULED: &str = "task_retry_scheduled";
    pub const TASK_REQUEUED: &str = "task_requeued";
    pub const TASK_FAILED: &str = "task_failed";
    pub const TASK_CANCELLED: &str = "task_cancelled";
    pub const QUEUE_STATS: &str = "queue_stats";
    pub const QUEUE_SNAPSHOT: &str = "queue_snapshot";
}

/// Counts of stored tasks per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// A state-change notification delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum QueueEvent {
    TaskSubmitted(Task),
    TaskStarted(Task),
    TaskProgress {
        id: String,
        progress: u8,
    },
    TaskCompleted(Task),
    TaskRetryScheduled {
        id: String,
        retry_count: u32,
        max_retries: u32,
        next_retry_at: DateTime<Utc>,
        error: TaskError,
    },
    TaskRequeued(Task),
    TaskFailed(Task),
    TaskCancelled {
        id: String,
    },
    QueueStats(QueueStats),
    QueueSnapshot(Vec<Task>),
}

impl QueueEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::TaskSubmitted(_) => event_types::TASK_SUBMITTED,
            QueueEvent::TaskStarted(_) => event_types::TASK_STARTED,
            QueueEvent::TaskProgress { .. } => event_types::TASK_PROGRESS,
            QueueEvent::TaskCompleted(_) => event_types::TASK_COMPLETED,
            QueueEvent::TaskRetryScheduled { .. } => event_types::TASK_RETRY_SCHEDULED,
            QueueEvent::TaskRequeued(_) => event_types::TASK_REQUEUED,
            QueueEvent::TaskFailed(_) => event_types::TASK_FAILED,
            QueueEvent::TaskCancelled { .. } => event_types::TASK_CANCELLED,
            QueueEvent::QueueStats(_) => event_types::QUEUE_STATS,
            QueueEvent::QueueSnapshot(_) => event_types::QUEUE_SNAPSHOT,
        }
    }

    /// Id of the task this event concerns, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            QueueEvent::TaskSubmitted(t)
            | QueueEvent::TaskStarted(t)
            | QueueEvent::TaskCompleted(t)
            | QueueEvent::TaskRequeued(t)
            | QueueEvent::TaskFailed(t) => Some(&t.id),
            QueueEvent::TaskProgress { id, .. }
            | QueueEvent::TaskRetryScheduled { id, .. }
            | QueueEvent::TaskCancelled { id } => Some(id),
            QueueEvent::QueueStats(_) | QueueEvent::QueueSnapshot(_) => None,
        }
    }

    /// Events after which the per-state counts may have changed
    pub fn changes_stats(&self) -> bool {
        !matches!(
            self,
            QueueEvent::TaskProgress { .. } | QueueEvent::QueueStats(_) | QueueEvent::QueueSnapshot(_)
        )
    }

    /// Events marking the end of a task's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::TaskCompleted(_) | QueueEvent::TaskFailed(_) | QueueEvent::TaskCancelled { .. }
        )
    }
}
