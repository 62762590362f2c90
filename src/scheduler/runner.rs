//! Scheduler loops: dispatch and retry promotion.
//!
//! Dispatch runs on a fixed interval and is also woken by the manager when a
//! task is submitted or a slot frees up. Each cycle claims tasks until no slot
//! is free or nothing is pending, and spawns one execution per claim onto a
//! `JoinSet`. Promotion runs on its own, slower interval and requeues retrying
//! tasks whose backoff has elapsed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::domain::Task;
use crate::executor::{ExecutionError, Executor, ProgressReporter};
use crate::manager::QueueManager;

/// Error code recorded when an executor panics
pub const EXECUTOR_PANIC: &str = "EXECUTOR_PANIC";

/// Drives tasks from Pending through execution
pub struct Scheduler {
    manager: Arc<QueueManager>,
    executor: Arc<dyn Executor>,
    dispatch_interval: Duration,
    retry_interval: Duration,
    executions: JoinSet<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(manager: Arc<QueueManager>, executor: Arc<dyn Executor>, config: &SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            manager,
            executor,
            dispatch_interval: config.dispatch_interval(),
            retry_interval: config.retry_interval(),
            executions: JoinSet::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Executions currently spawned and not yet reaped
    pub fn running(&self) -> usize {
        self.executions.len()
    }

    /// Claim and spawn as many tasks as free slots allow; returns how many
    pub fn dispatch_once(&mut self) -> usize {
        if *self.shutdown_rx.borrow() {
            return 0;
        }

        let mut started = 0;
        while let Some(task) = self.manager.claim_next() {
            self.spawn_execution(task);
            started += 1;
        }
        if started > 0 {
            tracing::debug!(started, running = self.executions.len(), "Dispatch cycle");
        }
        started
    }

    /// Requeue retrying tasks whose backoff has elapsed
    pub fn promote_once(&self) -> usize {
        self.manager.promote_due_retries(Utc::now())
    }

    /// Wait for every spawned execution to settle
    pub async fn settle(&mut self) {
        while let Some(joined) = self.executions.join_next().await {
            log_join_error(joined);
        }
    }

    fn spawn_execution(&mut self, task: Task) {
        let manager = self.manager.clone();
        let executor = self.executor.clone();
        let shutdown = self.shutdown_rx.clone();
        self.executions.spawn(execute_task(manager, executor, task, shutdown));
    }

    /// Start both loops in the background
    pub fn start(self) -> SchedulerHandle {
        let shutdown_tx = self.shutdown_tx.clone();
        let promotion = tokio::spawn(run_promotion(
            self.manager.clone(),
            self.retry_interval,
            self.shutdown_rx.clone(),
        ));
        let dispatch = tokio::spawn(self.run_dispatch());

        tracing::info!("Scheduler started");
        SchedulerHandle {
            shutdown_tx,
            dispatch,
            promotion,
        }
    }

    async fn run_dispatch(mut self) {
        let manager = self.manager.clone();
        let mut shutdown = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(self.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            self.dispatch_once();

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
                _ = manager.notified() => {}
                Some(joined) = self.executions.join_next(), if !self.executions.is_empty() => {
                    log_join_error(joined);
                }
            }
        }

        let aborted = self.executions.len();
        self.executions.abort_all();
        tracing::info!(aborted, "Dispatch loop stopped");
    }
}

/// Controls a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    dispatch: JoinHandle<()>,
    promotion: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop both loops and abort in-flight executions
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        for (name, handle) in [("dispatch", self.dispatch), ("promotion", self.promotion)] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Scheduler loop ended abnormally");
            }
        }
    }
}

async fn run_promotion(manager: Arc<QueueManager>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                manager.promote_due_retries(Utc::now());
            }
        }
    }
    tracing::debug!("Promotion loop stopped");
}

/// Run one claimed task and route its outcome back to the manager
async fn execute_task(
    manager: Arc<QueueManager>,
    executor: Arc<dyn Executor>,
    task: Task,
    shutdown: watch::Receiver<bool>,
) {
    let (reporter, mut progress_rx) = ProgressReporter::channel();
    let run = AssertUnwindSafe(executor.execute(&task.input, reporter)).catch_unwind();
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            biased;
            outcome = &mut run => break outcome,
            Some(progress) = progress_rx.recv() => manager.report_progress(&task.id, progress),
        }
    };
    while let Ok(progress) = progress_rx.try_recv() {
        manager.report_progress(&task.id, progress);
    }

    if *shutdown.borrow() {
        tracing::debug!(task_id = %task.id, "Discarding result after shutdown");
        return;
    }

    let routed = match outcome {
        Ok(Ok(output)) => manager.complete(&task.id, output),
        Ok(Err(error)) => manager.fail(&task.id, &error),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(task_id = %task.id, panic = %message, "Executor panicked");
            manager.fail(&task.id, &ExecutionError::with_retryable(EXECUTOR_PANIC, message, false))
        }
    };
    match routed {
        Err(e) if e.is_task_scoped() => {
            tracing::warn!(task_id = %task.id, error = %e, "Execution outcome not recorded")
        }
        Err(e) => tracing::error!(task_id = %task.id, error = %e, "Execution outcome not recorded"),
        Ok(_) => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "executor panicked".to_string()
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Err(e) if !e.is_cancelled() => tracing::error!(error = %e, "Execution task failed"),
        _ => {}
    }
}
