//! Scheduling primitives shared by sift's loader and session layers.
//!
//! Everything here runs on a Tokio runtime supplied by the caller. Nothing in
//! this crate spawns threads of its own: the search session is designed around
//! a single cooperative executor where the only suspension points are shard
//! fetches and debounce timers.

use std::time::Duration;

mod debouncer;
mod watchdog;

pub use debouncer::Debouncer;
pub use tokio_util::sync::CancellationToken;
pub use watchdog::run_with_deadline;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}
