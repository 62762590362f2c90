//! genqueue - An in-process asynchronous job queue
//!
//! genqueue accepts generation requests, runs them against a pluggable
//! backend with bounded concurrency, retries transient failures with jittered
//! exponential backoff, and streams every state change to live observers.

pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod hub;
pub mod id;
pub mod manager;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use domain::{QueueEvent, QueueStats, Task, TaskState};
pub use error::{QueueError, Result};
pub use executor::{ExecutionError, ExecutionOutput, Executor, ProgressReporter};
pub use hub::Subscription;
pub use manager::QueueManager;
pub use scheduler::{Scheduler, SchedulerHandle};
