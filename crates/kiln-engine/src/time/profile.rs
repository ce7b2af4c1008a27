use std::time::{Duration, Instant};

/// Profiling timestamps recorded as a task moves through the pipeline.
///
/// Each field is set once, when the task enters the matching state:
/// - `queued`: appended to a submission
/// - `submitted`: its submission was closed by a flush
/// - `started`: recorded into a native batch on the execution worker
/// - `ended`: completion resolved
#[derive(Debug, Copy, Clone, Default)]
pub struct TaskProfile {
    pub queued: Option<Instant>,
    pub submitted: Option<Instant>,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
}

impl TaskProfile {
    /// Time between recording and completion.
    pub fn execution_time(&self) -> Option<Duration> {
        Some(self.ended?.saturating_duration_since(self.started?))
    }

    /// Time between queueing and completion.
    pub fn total_time(&self) -> Option<Duration> {
        Some(self.ended?.saturating_duration_since(self.queued?))
    }

    pub(crate) fn stamp(slot: &mut Option<Instant>) {
        slot.get_or_insert_with(Instant::now);
    }
}
