//! Tasks, submissions and the shared task pool.
//!
//! Tasks are arena records addressed by generation-checked [`TaskId`]s with
//! explicit reference counts: the caller holds one reference from creation,
//! and the submission holds another from `submit_task` until completion.
//!
//! Per-task state machine:
//!
//! ```text
//! Created -> Queued -> Ready -> Dispatched -> Completed
//! ```
//!
//! Any pending state may also jump straight to `Completed` with a failure
//! outcome (device loss, teardown, cancellation).

mod error;
mod pool;
mod submission;
#[allow(clippy::module_inception)]
mod task;

pub use error::TaskError;
pub use pool::{TaskPool, TaskPoolLock};
pub use submission::{ClosedSubmission, Submission};
pub use task::{ContextId, TaskFailure, TaskId, TaskOutcome, TaskState, TaskWork};
