use std::fmt;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SchedulerError {
    /// The scheduler has been shut down and accepts no more work.
    ShutDown(String),
    /// A worker thread could not be started.
    Spawn(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::ShutDown(name) => write!(f, "scheduler '{name}' is shut down"),
            SchedulerError::Spawn(msg) => write!(f, "failed to spawn scheduler worker: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
