//! Scheduling for the job queue.
//!
//! This module provides:
//! - **Backoff**: exponential retry delays with jitter, capped per attempt.
//! - **Scheduler**: the dispatch cycle that claims free slots and runs tasks,
//!   and the promotion cycle that requeues retrying tasks once they are due.
//!
//! # Example
//!
//! ```ignore
//! use genqueue::scheduler::Scheduler;
//!
//! let manager = Arc::new(QueueManager::new(&config)?);
//! let handle = Scheduler::new(manager.clone(), executor, &config.scheduler).start();
//! manager.submit("a lighthouse at dusk")?;
//! // ...
//! handle.shutdown().await;
//! ```

mod backoff;
mod runner;

pub use backoff::BackoffPolicy;
pub use runner::{EXECUTOR_PANIC, Scheduler, SchedulerHandle};
