//! Background schedulers.
//!
//! Each hardware-bound context owns two of these: an execution scheduler
//! that issues batches to the native queue, and a completion scheduler that
//! waits on fences and resolves tasks. Both run off the caller's thread.

mod background;
mod config;
mod error;

pub use background::{BackgroundScheduler, SchedulerHandle, SchedulerStats, WorkItem};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
