use std::fmt;

use crate::native::NativeError;

/// Handle to a task record in a [`TaskPool`](super::TaskPool).
///
/// Handles are generation-checked: once a record is reclaimed its handle
/// stops resolving, even if the slot is reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

/// Identifies the hardware-bound context a task was submitted to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Task lifecycle. States only move forward.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TaskState {
    Created,
    /// Appended to its context's open submission.
    Queued,
    /// Preconditions satisfied; eligible for the next flush.
    Ready,
    /// Recorded into a native batch.
    Dispatched,
    Completed,
}

/// Why a task completed without executing successfully.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TaskFailure {
    /// The device was lost before or while the task executed.
    DeviceLost(String),
    /// The native layer rejected the batch containing the task.
    Dispatch(String),
    /// Teardown gave up waiting for the hardware to signal completion.
    DrainTimedOut,
    /// Released or torn down before it was ever dispatched.
    Cancelled,
}

impl TaskFailure {
    pub(crate) fn from_native(err: &NativeError) -> Self {
        if err.is_device_loss() {
            TaskFailure::DeviceLost(err.to_string())
        } else {
            TaskFailure::Dispatch(err.to_string())
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::DeviceLost(msg) => write!(f, "device lost: {msg}"),
            TaskFailure::Dispatch(msg) => write!(f, "dispatch failed: {msg}"),
            TaskFailure::DrainTimedOut => f.write_str("completion not signalled before teardown deadline"),
            TaskFailure::Cancelled => f.write_str("task cancelled before dispatch"),
        }
    }
}

impl std::error::Error for TaskFailure {}

/// Final result of a task, set exactly once.
pub type TaskOutcome = Result<(), TaskFailure>;

/// Opaque GPU-side effect of a task.
///
/// Runs once on the execution worker, recording into the batch encoder.
pub type TaskWork<E> = Box<dyn FnOnce(&mut E) -> Result<(), NativeError> + Send>;
