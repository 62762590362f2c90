//! TaskStore implementation: in-memory task records and the state machine.
//!
//! The store is a plain struct with no interior locking. The queue manager
//! wraps it in a mutex so that every read-modify-write (a state transition,
//! claiming a processing slot) happens as one step. Each mutation returns the
//! event describing it; publishing is left to the caller, which still holds
//! the lock, so observers see events in mutation order.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::QueueConfig;
use crate::domain::{QueueEvent, QueueStats, Task, TaskError, TaskResult, TaskState};
use crate::error::{QueueError, Result};
use crate::executor::{ExecutionError, ExecutionOutput};
use crate::id::generate_task_id;
use crate::scheduler::BackoffPolicy;

/// Duration assumed for wait estimates before any task has completed
const INITIAL_DURATION_ESTIMATE_MS: u64 = 30_000;

/// Outcome of a successful store mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Snapshot of the task after the mutation (the removed record for cancel)
    pub task: Task,
    /// Event to publish
    pub event: QueueEvent,
}

impl Transition {
    fn new(task: Task, event: QueueEvent) -> Self {
        Self { task, event }
    }
}

/// Authoritative storage for task records
#[derive(Debug)]
pub struct TaskStore {
    tasks: HashMap<String, Task>,
    capacity: usize,
    max_input_len: usize,
    max_concurrent: usize,
    backoff: BackoffPolicy,
    avg_duration_ms: u64,
    completed_samples: u64,
    next_seq: u64,
}

impl TaskStore {
    /// Create an empty store
    pub fn new(config: &QueueConfig, backoff: BackoffPolicy) -> Self {
        Self {
            tasks: HashMap::new(),
            capacity: config.capacity,
            max_input_len: config.max_input_len,
            max_concurrent: config.max_concurrent.max(1),
            backoff,
            avg_duration_ms: INITIAL_DURATION_ESTIMATE_MS,
            completed_samples: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    //=== Queries ===

    /// Snapshot of one task
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    /// All tasks, newest first
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        tasks
    }

    /// Oldest pending task; equal timestamps resolve to the smaller id
    pub fn next_pending(&self) -> Option<Task> {
        self.pending_fifo().into_iter().next().cloned()
    }

    /// Retrying tasks whose backoff has elapsed, earliest due first
    pub fn due_retries(&self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Retrying && t.next_retry_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_retry_at.cmp(&b.next_retry_at).then_with(|| a.id.cmp(&b.id)));
        due
    }

    /// Tasks currently holding a processing slot
    pub fn processing_count(&self) -> usize {
        self.count_in(TaskState::Processing)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.count_in(TaskState::Pending),
            processing: self.count_in(TaskState::Processing),
            retrying: self.count_in(TaskState::Retrying),
            completed: self.count_in(TaskState::Completed),
            failed: self.count_in(TaskState::Failed),
            total: self.tasks.len(),
        }
    }

    /// Running average of successful execution time
    pub fn avg_duration_ms(&self) -> u64 {
        self.avg_duration_ms
    }

    fn count_in(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    fn pending_fifo(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self.tasks.values().filter(|t| t.state == TaskState::Pending).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    //=== Mutations ===

    /// Store a new pending task
    pub fn create(&mut self, input: &str, now: DateTime<Utc>) -> Result<Transition> {
        if input.trim().is_empty() {
            return Err(QueueError::InvalidInput("input is empty".to_string()));
        }
        let len = input.chars().count();
        if len > self.max_input_len {
            return Err(QueueError::InvalidInput(format!(
                "input is {} characters, limit is {}",
                len, self.max_input_len
            )));
        }
        if self.tasks.len() >= self.capacity {
            return Err(QueueError::QueueFull {
                capacity: self.capacity,
            });
        }

        let id = generate_task_id(now, self.next_seq);
        self.next_seq += 1;

        let mut task = Task::new(id, input, now, self.backoff.max_retries);
        let ahead = self.count_in(TaskState::Pending);
        task.estimated_wait_ms = Some(self.estimate_wait(ahead));
        self.tasks.insert(task.id.clone(), task.clone());

        tracing::info!(task_id = %task.id, "Task submitted");
        Ok(Transition::new(task.clone(), QueueEvent::TaskSubmitted(task)))
    }

    /// Atomically claim a free slot for the oldest pending task
    pub fn claim_next(&mut self, max_concurrent: usize, now: DateTime<Utc>) -> Option<Transition> {
        if self.processing_count() >= max_concurrent {
            return None;
        }
        let id = self.next_pending()?.id;
        self.transition_to_processing(&id, now).ok()
    }

    /// Pending -> Processing
    pub fn transition_to_processing(&mut self, id: &str, now: DateTime<Utc>) -> Result<Transition> {
        let task = self.task_for(id, TaskState::Processing)?;
        task.state = TaskState::Processing;
        task.progress = 0;
        task.estimated_wait_ms = None;
        task.started_at.get_or_insert(now);

        let task = task.clone();
        tracing::info!(task_id = %task.id, attempt = task.retry_count + 1, "Task started");
        Ok(Transition::new(task.clone(), QueueEvent::TaskStarted(task)))
    }

    /// Record progress of a processing task; stale or repeated values are ignored
    pub fn update_progress(&mut self, id: &str, progress: u8) -> Option<QueueEvent> {
        let task = self.tasks.get_mut(id)?;
        let progress = progress.min(100);
        if task.state != TaskState::Processing || progress <= task.progress {
            return None;
        }
        task.progress = progress;
        Some(QueueEvent::TaskProgress {
            id: task.id.clone(),
            progress,
        })
    }

    /// Processing -> Completed
    pub fn complete(&mut self, id: &str, output: ExecutionOutput, now: DateTime<Utc>) -> Result<Transition> {
        let duration_ms = output.duration_ms;
        let task = self.task_for(id, TaskState::Completed)?;
        task.state = TaskState::Completed;
        task.progress = 100;
        task.result = Some(TaskResult {
            payload: output.payload,
            duration_ms,
        });
        task.error = None;
        task.next_retry_at = None;
        task.completed_at = Some(now);

        let task = task.clone();
        self.record_duration(duration_ms);
        tracing::info!(task_id = %task.id, duration_ms, "Task completed");
        Ok(Transition::new(task.clone(), QueueEvent::TaskCompleted(task)))
    }

    /// Processing -> Retrying, or Processing -> Failed once retries are spent
    /// or the failure is permanent
    pub fn fail(&mut self, id: &str, error: &ExecutionError, now: DateTime<Utc>) -> Result<Transition> {
        let retry = {
            let task = self.tasks.get(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            error.retryable && task.has_retries_left()
        };
        let next_state = if retry { TaskState::Retrying } else { TaskState::Failed };
        let backoff = self.backoff.clone();

        let task = self.task_for(id, next_state)?;
        let task_error = TaskError::from(error);
        task.error = Some(task_error.clone());

        if retry {
            task.retry_count += 1;
            let delay = backoff.delay(task.retry_count);
            let next_retry_at = retry_at(now, delay, backoff.cap_delay);
            task.state = TaskState::Retrying;
            task.next_retry_at = Some(next_retry_at);

            let task = task.clone();
            tracing::warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Task failed, retry scheduled"
            );
            let event = QueueEvent::TaskRetryScheduled {
                id: task.id.clone(),
                retry_count: task.retry_count,
                max_retries: task.max_retries,
                next_retry_at,
                error: task_error,
            };
            Ok(Transition::new(task, event))
        } else {
            task.state = TaskState::Failed;
            task.next_retry_at = None;
            task.completed_at = Some(now);

            let task = task.clone();
            tracing::error!(
                task_id = %task.id,
                retry_count = task.retry_count,
                retryable = error.retryable,
                error = %error,
                "Task failed permanently"
            );
            Ok(Transition::new(task.clone(), QueueEvent::TaskFailed(task)))
        }
    }

    /// Retrying -> Pending
    pub fn requeue(&mut self, id: &str) -> Result<Transition> {
        let task = self.task_for(id, TaskState::Pending)?;
        task.state = TaskState::Pending;
        task.error = None;
        task.next_retry_at = None;
        task.progress = 0;

        let task = task.clone();
        tracing::info!(task_id = %task.id, retry_count = task.retry_count, "Task requeued");
        Ok(Transition::new(task.clone(), QueueEvent::TaskRequeued(task)))
    }

    /// Remove a task that is not processing
    pub fn cancel(&mut self, id: &str) -> Result<Transition> {
        let state = self
            .tasks
            .get(id)
            .map(|t| t.state)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if !state.is_cancellable() {
            return Err(QueueError::InvalidState(format!("task {} is {} and cannot be cancelled", id, state)));
        }

        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        tracing::info!(task_id = %task.id, state = %state, "Task cancelled");
        let event = QueueEvent::TaskCancelled { id: task.id.clone() };
        Ok(Transition::new(task, event))
    }

    /// Recompute wait estimates for pending tasks in dispatch order
    pub fn refresh_estimates(&mut self) {
        let order: Vec<String> = self.pending_fifo().into_iter().map(|t| t.id.clone()).collect();
        for (ahead, id) in order.iter().enumerate() {
            let estimate = self.estimate_wait(ahead);
            if let Some(task) = self.tasks.get_mut(id) {
                task.estimated_wait_ms = Some(estimate);
            }
        }
    }

    //=== Internals ===

    /// Mutable access to `id`, checked against the state machine
    fn task_for(&mut self, id: &str, next: TaskState) -> Result<&mut Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if !task.state.can_transition_to(next) {
            tracing::error!(task_id = %id, from = %task.state, to = %next, "Refused state transition");
            return Err(QueueError::InvalidState(format!(
                "task {} cannot move from {} to {}",
                id, task.state, next
            )));
        }
        Ok(task)
    }

    /// Zero when a slot is free for this task, otherwise whole waves of
    /// `max_concurrent` tasks times the average duration
    fn estimate_wait(&self, pending_ahead: usize) -> u64 {
        let busy = self.processing_count() + pending_ahead;
        if busy < self.max_concurrent {
            return 0;
        }
        let waves = (pending_ahead / self.max_concurrent) as u64 + 1;
        waves * self.avg_duration_ms
    }

    fn record_duration(&mut self, duration_ms: u64) {
        let n = self.completed_samples;
        self.avg_duration_ms = if n == 0 {
            duration_ms
        } else {
            (self.avg_duration_ms * n + duration_ms) / (n + 1)
        };
        self.completed_samples = n + 1;
    }
}

/// `now + delay`, falling back to `now + cap` and then the latest
/// representable instant when the sum overflows
fn retry_at(now: DateTime<Utc>, delay: Duration, cap: Duration) -> DateTime<Utc> {
    let after = |d: Duration| TimeDelta::from_std(d).ok().and_then(|d| now.checked_add_signed(d));
    after(delay).or_else(|| after(cap)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
