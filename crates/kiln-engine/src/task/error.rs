use std::fmt;

use super::{ContextId, TaskId, TaskState};

/// Misuse of the task pool.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TaskError {
    /// The handle does not name a live task.
    UnknownTask(TaskId),
    /// The requested transition would move the task backwards or skip a state.
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },
    /// The task belongs to another context.
    WrongContext {
        task: TaskId,
        expected: ContextId,
        actual: Option<ContextId>,
    },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::UnknownTask(id) => write!(f, "unknown task {id}"),
            TaskError::InvalidTransition { task, from, to } => {
                write!(f, "{task}: invalid transition {from:?} -> {to:?}")
            }
            TaskError::WrongContext { task, expected, actual } => match actual {
                Some(actual) => write!(f, "{task} belongs to {actual}, not {expected}"),
                None => write!(f, "{task} was never submitted (expected {expected})"),
            },
        }
    }
}

impl std::error::Error for TaskError {}
