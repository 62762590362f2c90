//! Queue manager: the single entry point to the queue.
//!
//! The manager owns the task store behind a mutex and the broadcast hub.
//! Every mutation publishes its event while the store lock is still held, so
//! two events about the same task always reach observers in the order the
//! transitions happened. A `queue_stats` event follows every state change.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::config::Config;
use crate::domain::{QueueEvent, QueueStats, Task};
use crate::error::Result;
use crate::executor::{ExecutionError, ExecutionOutput};
use crate::hub::{BroadcastHub, Subscription};
use crate::scheduler::BackoffPolicy;
use crate::store::TaskStore;

/// Submission, query, cancellation and observation of queued tasks
#[derive(Debug)]
pub struct QueueManager {
    store: Mutex<TaskStore>,
    hub: BroadcastHub,
    max_concurrent: usize,
    /// Wakes the dispatch cycle when a task arrives or a slot frees up
    wake: Notify,
}

impl QueueManager {
    /// Build a manager from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = TaskStore::new(&config.queue, BackoffPolicy::from(&config.retry));

        Ok(Self {
            store: Mutex::new(store),
            hub: BroadcastHub::new(config.hub.subscriber_buffer),
            max_concurrent: config.queue.max_concurrent,
            wake: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TaskStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event, followed by fresh stats when the event changed them
    fn publish(&self, store: &TaskStore, event: &QueueEvent) {
        self.hub.publish(event);
        if event.changes_stats() {
            self.hub.publish(&QueueEvent::QueueStats(store.stats()));
        }
    }

    //=== Submission side ===

    /// Queue a new task
    pub fn submit(&self, input: &str) -> Result<Task> {
        let task = {
            let mut store = self.lock();
            let created = store.create(input, Utc::now())?;
            self.publish(&store, &created.event);
            created.task
        };
        self.wake.notify_one();
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().get(id)
    }

    /// All tasks, newest first
    pub fn list(&self) -> Vec<Task> {
        self.lock().list()
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats()
    }

    /// Remove a task that is not currently processing
    pub fn cancel(&self, id: &str) -> Result<Task> {
        let mut store = self.lock();
        let cancelled = store.cancel(id)?;
        self.publish(&store, &cancelled.event);
        store.refresh_estimates();
        Ok(cancelled.task)
    }

    //=== Observer side ===

    /// Register an observer; its stream opens with a snapshot and stats
    pub fn subscribe(&self) -> Subscription {
        let store = self.lock();
        let initial = vec![
            QueueEvent::QueueSnapshot(store.list()),
            QueueEvent::QueueStats(store.stats()),
        ];
        self.hub.subscribe(initial)
    }

    pub fn unsubscribe(&self, subscription_id: u64) -> bool {
        self.hub.unsubscribe(subscription_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    //=== Scheduler side ===

    /// Move the oldest pending task to Processing if a slot is free
    pub fn claim_next(&self) -> Option<Task> {
        let mut store = self.lock();
        let claimed = store.claim_next(self.max_concurrent, Utc::now())?;
        self.publish(&store, &claimed.event);
        store.refresh_estimates();
        Some(claimed.task)
    }

    /// Forward a progress update from a running execution
    pub fn report_progress(&self, id: &str, progress: u8) {
        let mut store = self.lock();
        if let Some(event) = store.update_progress(id, progress) {
            self.publish(&store, &event);
        }
    }

    /// Record a successful execution
    pub fn complete(&self, id: &str, output: ExecutionOutput) -> Result<Task> {
        let task = {
            let mut store = self.lock();
            let completed = store.complete(id, output, Utc::now())?;
            self.publish(&store, &completed.event);
            store.refresh_estimates();
            completed.task
        };
        self.wake.notify_one();
        Ok(task)
    }

    /// Record a failed execution; the store decides between retry and failure
    pub fn fail(&self, id: &str, error: &ExecutionError) -> Result<Task> {
        let task = {
            let mut store = self.lock();
            let failed = store.fail(id, error, Utc::now())?;
            self.publish(&store, &failed.event);
            failed.task
        };
        self.wake.notify_one();
        Ok(task)
    }

    /// Requeue every retrying task whose backoff elapsed by `now`
    pub fn promote_due_retries(&self, now: DateTime<Utc>) -> usize {
        let promoted = {
            let mut store = self.lock();
            let mut promoted = 0;
            for task in store.due_retries(now) {
                match store.requeue(&task.id) {
                    Ok(requeued) => {
                        self.publish(&store, &requeued.event);
                        promoted += 1;
                    }
                    Err(e) => tracing::warn!(task_id = %task.id, error = %e, "Retry promotion skipped"),
                }
            }
            if promoted > 0 {
                store.refresh_estimates();
            }
            promoted
        };

        if promoted > 0 {
            tracing::debug!(promoted, "Promoted due retries");
            self.wake.notify_one();
        }
        promoted
    }

    /// Resolves on the next dispatch wake-up
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }
}
