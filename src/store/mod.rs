//! Task storage for genqueue.
//!
//! Records live in memory only and are lost when the process exits. The
//! store enforces capacity, input limits, and the task state machine; callers
//! serialize access to it.
//!
//! # Example
//!
//! ```ignore
//! use genqueue::store::TaskStore;
//!
//! let mut store = TaskStore::new(&config.queue, BackoffPolicy::from(&config.retry));
//! let created = store.create("a lighthouse at dusk", Utc::now())?;
//! let started = store.claim_next(config.queue.max_concurrent, Utc::now());
//! ```

mod task_store;

pub use task_store::{TaskStore, Transition};
