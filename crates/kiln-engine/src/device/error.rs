use std::fmt;

use crate::caps::CapsError;
use crate::native::NativeError;
use crate::scheduler::SchedulerError;
use crate::task::{ContextId, TaskError};

/// Failure of a logical device or hardware-bound context operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The context's device was lost earlier; new work is rejected.
    DeviceLost(String),
    /// The context has been released and torn down.
    ContextReleased(ContextId),
    /// The task-pool lock passed in was taken on a different pool.
    ForeignPoolLock,
    Caps(CapsError),
    Native(NativeError),
    Scheduler(SchedulerError),
    Task(TaskError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::DeviceLost(reason) => write!(f, "device lost: {reason}"),
            DeviceError::ContextReleased(id) => write!(f, "{id} has been released"),
            DeviceError::ForeignPoolLock => f.write_str("lock taken on another task pool"),
            DeviceError::Caps(err) => err.fmt(f),
            DeviceError::Native(err) => err.fmt(f),
            DeviceError::Scheduler(err) => err.fmt(f),
            DeviceError::Task(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Caps(err) => Some(err),
            DeviceError::Native(err) => Some(err),
            DeviceError::Scheduler(err) => Some(err),
            DeviceError::Task(err) => Some(err),
            DeviceError::DeviceLost(_)
            | DeviceError::ContextReleased(_)
            | DeviceError::ForeignPoolLock => None,
        }
    }
}

impl From<CapsError> for DeviceError {
    fn from(err: CapsError) -> Self {
        DeviceError::Caps(err)
    }
}

impl From<NativeError> for DeviceError {
    fn from(err: NativeError) -> Self {
        DeviceError::Native(err)
    }
}

impl From<SchedulerError> for DeviceError {
    fn from(err: SchedulerError) -> Self {
        DeviceError::Scheduler(err)
    }
}

impl From<TaskError> for DeviceError {
    fn from(err: TaskError) -> Self {
        DeviceError::Task(err)
    }
}
