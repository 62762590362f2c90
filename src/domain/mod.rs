//! Domain types for genqueue
//!
//! This module contains the core domain types:
//! - Task: the unit of work with its lifecycle record
//! - TaskState: the state machine's states and legal edges
//! - QueueEvent: state-change notifications streamed to observers
//! - QueueStats: per-state task counts

pub mod event;
pub mod task;

pub use event::{QueueEvent, QueueStats, event_types};
pub use task::{Task, TaskError, TaskResult, TaskState};
