//! ID generation utilities for genqueue
//!
//! Task ids embed their creation time so they sort roughly by age, followed
//! by a per-store sequence number so that no two tasks ever share an id, even
//! when they land in the same millisecond or an earlier task was removed.

use chrono::{DateTime, Utc};

/// Generate a task ID for the given creation time and sequence number
///
/// Format: `task-{timestamp_ms}-{seq_hex}` (at least 8 hex digits)
/// Example: `task-1738300800123-0000002a`
pub fn generate_task_id(created_at: DateTime<Utc>, seq: u64) -> String {
    format!("task-{}-{:08x}", created_at.timestamp_millis(), seq)
}

/// Generate a subscriber label for log output
///
/// Format: `sub-{n}`
pub fn subscriber_label(n: u64) -> String {
    format!("sub-{}", n)
}
