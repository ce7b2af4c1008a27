use super::{ContextId, TaskId, TaskWork};

/// The open, append-only batch of a context.
///
/// Lives inside the task-pool state, so it can only be touched while the
/// task-pool lock is held.
#[derive(Debug, Default)]
pub struct Submission {
    tasks: Vec<TaskId>,
    /// Length of the leading run of tasks known to be Ready.
    ready_prefix: usize,
    closed: u64,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in the order they were appended.
    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    /// Number of batches closed from this submission so far.
    pub fn closed_count(&self) -> u64 {
        self.closed
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains(&id)
    }

    pub(crate) fn push(&mut self, id: TaskId) {
        self.tasks.push(id);
    }

    /// Cached length of the ready prefix.
    pub fn ready_prefix(&self) -> usize {
        self.ready_prefix
    }

    /// Extends the cached ready prefix past every further task `is_ready`
    /// accepts and returns the new length.
    ///
    /// Tasks inside the prefix are not looked at again, so marking the tasks
    /// of a submission ready one by one costs linear time overall.
    pub(crate) fn advance_ready_prefix(&mut self, is_ready: impl Fn(TaskId) -> bool) -> usize {
        while let Some(&id) = self.tasks.get(self.ready_prefix) {
            if !is_ready(id) {
                break;
            }
            self.ready_prefix += 1;
        }
        self.ready_prefix
    }

    /// Closes the first `n` tasks as one batch; the rest stay open.
    ///
    /// Returns the batch serial together with the closed ids.
    pub(crate) fn close_prefix(&mut self, n: usize) -> (u64, Vec<TaskId>) {
        debug_assert!(n > 0 && n <= self.tasks.len());
        let closed: Vec<TaskId> = self.tasks.drain(..n).collect();
        self.ready_prefix = self.ready_prefix.saturating_sub(n);
        let serial = self.closed;
        self.closed += 1;
        (serial, closed)
    }

    /// Empties the submission without closing a batch.
    pub(crate) fn drain_all(&mut self) -> Vec<TaskId> {
        self.ready_prefix = 0;
        std::mem::take(&mut self.tasks)
    }
}

/// A closed batch, handed to the execution scheduler.
///
/// Nothing can be appended once closed; execution consumes it by value.
pub struct ClosedSubmission<E> {
    context: ContextId,
    serial: u64,
    entries: Vec<(TaskId, TaskWork<E>)>,
}

impl<E> ClosedSubmission<E> {
    pub(crate) fn new(context: ContextId, serial: u64, entries: Vec<(TaskId, TaskWork<E>)>) -> Self {
        debug_assert!(!entries.is_empty());
        Self { context, serial, entries }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Position of this batch among the batches closed by its context.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn into_entries(self) -> Vec<(TaskId, TaskWork<E>)> {
        self.entries
    }
}

impl<E> std::fmt::Debug for ClosedSubmission<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedSubmission")
            .field("context", &self.context)
            .field("serial", &self.serial)
            .field("tasks", &self.task_ids())
            .finish()
    }
}
