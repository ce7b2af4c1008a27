use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::native::NativeError;
use crate::time::TaskProfile;

use super::{
    ClosedSubmission, ContextId, Submission, TaskError, TaskFailure, TaskId, TaskOutcome,
    TaskState, TaskWork,
};

struct TaskRecord<E> {
    state: TaskState,
    /// Caller references plus the submission reference while one is held.
    refs: u32,
    in_submission: bool,
    sequence: Option<u64>,
    context: Option<ContextId>,
    work: Option<TaskWork<E>>,
    outcome: Option<TaskOutcome>,
    profile: TaskProfile,
}

struct Slot<E> {
    generation: u32,
    record: Option<TaskRecord<E>>,
}

struct PoolState<E> {
    slots: Vec<Slot<E>>,
    free: Vec<u32>,
    live: usize,
    next_sequence: u64,
    open: HashMap<ContextId, Submission>,
}

/// Arena of task records shared by every context of one or more logical devices.
///
/// The mutex inside is the task-pool lock. Operations that touch open
/// submissions are only reachable through a [`TaskPoolLock`], which callers
/// obtain with [`TaskPool::lock`] and pass explicitly.
pub struct TaskPool<E> {
    state: Mutex<PoolState<E>>,
    completed: Condvar,
}

/// Evidence that the task-pool lock is held.
pub struct TaskPoolLock<'a, E> {
    pool: &'a TaskPool<E>,
    state: MutexGuard<'a, PoolState<E>>,
}

impl<E: 'static> TaskPool<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
                next_sequence: 0,
                open: HashMap::new(),
            }),
            completed: Condvar::new(),
        }
    }

    /// Acquires the task-pool lock.
    pub fn lock(&self) -> TaskPoolLock<'_, E> {
        TaskPoolLock {
            pool: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Creates a task holding one caller reference.
    pub fn create_task<F>(&self, work: F) -> TaskId
    where
        F: FnOnce(&mut E) -> Result<(), NativeError> + Send + 'static,
    {
        self.lock().create_task(Box::new(work))
    }

    /// Adds a caller reference.
    pub fn retain(&self, id: TaskId) -> Result<(), TaskError> {
        let mut lock = self.lock();
        let record = lock.state.record_mut(id)?;
        record.refs += 1;
        Ok(())
    }

    /// Drops a caller reference.
    ///
    /// A task released before it was ever submitted completes as cancelled.
    /// The record is reclaimed once it is completed and unreferenced.
    pub fn release(&self, id: TaskId) -> Result<(), TaskError> {
        let mut lock = self.lock();
        let record = lock.state.record_mut(id)?;
        record.refs = record.refs.saturating_sub(1);
        let abandon = record.refs == 0 && record.state == TaskState::Created;
        if abandon {
            log::debug!("{id} released before submission");
            lock.complete(id, Err(TaskFailure::Cancelled));
        } else {
            lock.state.reclaim_if_done(id);
        }
        Ok(())
    }

    pub fn state(&self, id: TaskId) -> Result<TaskState, TaskError> {
        self.lock().state(id)
    }

    pub fn outcome(&self, id: TaskId) -> Result<Option<TaskOutcome>, TaskError> {
        self.lock().outcome(id)
    }

    pub fn profile(&self, id: TaskId) -> Result<TaskProfile, TaskError> {
        Ok(self.lock().state.record(id)?.profile)
    }

    /// Sequence id assigned when the task was made ready.
    pub fn sequence(&self, id: TaskId) -> Result<Option<u64>, TaskError> {
        Ok(self.lock().state.record(id)?.sequence)
    }

    /// Number of records that have not been reclaimed.
    pub fn live_tasks(&self) -> usize {
        self.lock().state.live
    }

    /// Blocks until `id` completes.
    ///
    /// This does not flush; use the owning context's `wait` for a task that
    /// may still sit in an open submission.
    pub fn wait(&self, id: TaskId) -> Result<TaskOutcome, TaskError> {
        self.lock().wait_until_complete(id)
    }

    /// Blocks for at most `timeout`; `Ok(None)` if the task is still pending.
    pub fn wait_timeout(&self, id: TaskId, timeout: Duration) -> Result<Option<TaskOutcome>, TaskError> {
        self.lock().wait_until_complete_for(id, timeout)
    }
}

impl<E: 'static> Default for TaskPool<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, E: 'static> TaskPoolLock<'a, E> {
    /// True if this guard was taken on `pool`.
    pub fn belongs_to(&self, pool: &TaskPool<E>) -> bool {
        std::ptr::eq(self.pool, pool)
    }

    pub fn create_task(&mut self, work: TaskWork<E>) -> TaskId {
        let state = &mut *self.state;
        let record = TaskRecord {
            state: TaskState::Created,
            refs: 1,
            in_submission: false,
            sequence: None,
            context: None,
            work: Some(work),
            outcome: None,
            profile: TaskProfile::default(),
        };

        state.live += 1;
        match state.free.pop() {
            Some(index) => {
                let slot = &mut state.slots[index as usize];
                slot.record = Some(record);
                TaskId { index, generation: slot.generation }
            }
            None => {
                let index = state.slots.len() as u32;
                state.slots.push(Slot { generation: 0, record: Some(record) });
                TaskId { index, generation: 0 }
            }
        }
    }

    pub fn state(&self, id: TaskId) -> Result<TaskState, TaskError> {
        Ok(self.state.record(id)?.state)
    }

    pub fn outcome(&self, id: TaskId) -> Result<Option<TaskOutcome>, TaskError> {
        Ok(self.state.record(id)?.outcome.clone())
    }

    /// The open submission of `context`, if the context is registered.
    pub fn open_submission(&self, context: ContextId) -> Option<&Submission> {
        self.state.open.get(&context)
    }

    pub(crate) fn register_context(&mut self, context: ContextId) {
        self.state.open.entry(context).or_default();
    }

    /// Forgets `context`, returning whatever was still in its open submission.
    pub(crate) fn unregister_context(&mut self, context: ContextId) -> Vec<TaskId> {
        self.state
            .open
            .remove(&context)
            .map(|mut s| s.drain_all())
            .unwrap_or_default()
    }

    /// Created → Queued: appends to the open submission of `context`.
    pub(crate) fn enqueue(&mut self, context: ContextId, id: TaskId) -> Result<(), TaskError> {
        let record = self.state.record_mut(id)?;
        check_transition(id, record.state, TaskState::Queued)?;
        record.state = TaskState::Queued;
        record.context = Some(context);
        record.refs += 1;
        record.in_submission = true;
        TaskProfile::stamp(&mut record.profile.queued);

        self.state.open.entry(context).or_default().push(id);
        Ok(())
    }

    /// Queued → Ready. Returns the length of the ready prefix afterwards.
    pub(crate) fn mark_ready(&mut self, context: ContextId, id: TaskId) -> Result<usize, TaskError> {
        let sequence = self.state.next_sequence;
        let record = self.state.record_mut(id)?;
        if record.context != Some(context) {
            return Err(TaskError::WrongContext {
                task: id,
                expected: context,
                actual: record.context,
            });
        }
        check_transition(id, record.state, TaskState::Ready)?;
        record.state = TaskState::Ready;
        record.sequence = Some(sequence);
        self.state.next_sequence += 1;

        Ok(self.ready_prefix_len(context))
    }

    /// Number of leading tasks of the open submission that are Ready.
    pub(crate) fn ready_prefix_len(&mut self, context: ContextId) -> usize {
        let state = &mut *self.state;
        let Some(open) = state.open.get_mut(&context) else {
            return 0;
        };
        let slots = &state.slots;
        open.advance_ready_prefix(|id| is_ready(slots, id))
    }

    /// True if `id` is still waiting in the open submission of `context`.
    pub(crate) fn is_open(&self, context: ContextId, id: TaskId) -> bool {
        self.state
            .open
            .get(&context)
            .is_some_and(|s| s.contains(id))
    }

    /// Closes the ready prefix of the open submission into a batch.
    ///
    /// The first task that is not Ready, and everything after it, stays open.
    pub(crate) fn close_ready_prefix(&mut self, context: ContextId) -> Option<ClosedSubmission<E>> {
        let n = self.ready_prefix_len(context);
        if n == 0 {
            return None;
        }

        let state = &mut *self.state;
        let (serial, ids) = state.open.get_mut(&context)?.close_prefix(n);

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(record) = state.record_mut(id) else {
                log::error!("{id} vanished from open submission of {context}");
                continue;
            };
            TaskProfile::stamp(&mut record.profile.submitted);
            match record.work.take() {
                Some(work) => entries.push((id, work)),
                None => log::error!("{id} closed without work"),
            }
        }

        if entries.is_empty() {
            return None;
        }
        Some(ClosedSubmission::new(context, serial, entries))
    }

    /// Ready → Dispatched for every task of a recorded batch.
    pub(crate) fn mark_dispatched(&mut self, ids: &[TaskId]) {
        for id in ids {
            match self.state.record_mut(*id) {
                Ok(record) if record.state == TaskState::Ready => {
                    record.state = TaskState::Dispatched;
                    TaskProfile::stamp(&mut record.profile.started);
                }
                Ok(record) => log::warn!("{id}: dispatch from unexpected state {:?}", record.state),
                Err(err) => log::warn!("{err}"),
            }
        }
    }

    /// Resolves a task. The first resolution wins; later ones are ignored.
    pub(crate) fn complete(&mut self, id: TaskId, outcome: TaskOutcome) {
        let Ok(record) = self.state.record_mut(id) else {
            log::warn!("completion for unknown {id}");
            return;
        };
        if record.state == TaskState::Completed {
            log::warn!("{id} completed twice; keeping first outcome");
            return;
        }

        if let Err(failure) = &outcome {
            log::debug!("{id} failed: {failure}");
        }
        record.state = TaskState::Completed;
        record.outcome = Some(outcome);
        record.work = None;
        TaskProfile::stamp(&mut record.profile.ended);
        if record.in_submission {
            record.in_submission = false;
            record.refs = record.refs.saturating_sub(1);
        }

        self.state.reclaim_if_done(id);
        self.pool.completed.notify_all();
    }

    pub(crate) fn complete_all(&mut self, ids: &[TaskId], outcome: &TaskOutcome) {
        for id in ids {
            self.complete(*id, outcome.clone());
        }
    }

    /// Empties the open submission of `context`, failing every task in it.
    pub(crate) fn fail_open(&mut self, context: ContextId, failure: TaskFailure) -> usize {
        let ids = self
            .state
            .open
            .get_mut(&context)
            .map(|s| s.drain_all())
            .unwrap_or_default();
        self.complete_all(&ids, &Err(failure));
        ids.len()
    }

    /// Waits on the completion condvar until `id` completes.
    pub(crate) fn wait_until_complete(self, id: TaskId) -> Result<TaskOutcome, TaskError> {
        let TaskPoolLock { pool, mut state } = self;
        loop {
            if let Some(outcome) = &state.record(id)?.outcome {
                return Ok(outcome.clone());
            }
            state = pool.completed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`TaskPoolLock::wait_until_complete`], giving up after `timeout`.
    pub(crate) fn wait_until_complete_for(
        self,
        id: TaskId,
        timeout: Duration,
    ) -> Result<Option<TaskOutcome>, TaskError> {
        let deadline = Instant::now() + timeout;
        let TaskPoolLock { pool, mut state } = self;
        loop {
            if let Some(outcome) = &state.record(id)?.outcome {
                return Ok(Some(outcome.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = pool
                .completed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<E> PoolState<E> {
    fn record(&self, id: TaskId) -> Result<&TaskRecord<E>, TaskError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_ref())
            .ok_or(TaskError::UnknownTask(id))
    }

    fn record_mut(&mut self, id: TaskId) -> Result<&mut TaskRecord<E>, TaskError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.record.as_mut())
            .ok_or(TaskError::UnknownTask(id))
    }

    fn reclaim_if_done(&mut self, id: TaskId) {
        let done = self
            .record(id)
            .is_ok_and(|r| r.refs == 0 && r.state == TaskState::Completed);
        if !done {
            return;
        }

        let slot = &mut self.slots[id.index as usize];
        slot.record = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
    }
}

fn is_ready<E>(slots: &[Slot<E>], id: TaskId) -> bool {
    slots
        .get(id.index as usize)
        .filter(|slot| slot.generation == id.generation)
        .and_then(|slot| slot.record.as_ref())
        .is_some_and(|r| r.state == TaskState::Ready)
}

fn check_transition(task: TaskId, from: TaskState, to: TaskState) -> Result<(), TaskError> {
    let allowed = matches!(
        (from, to),
        (TaskState::Created, TaskState::Queued)
            | (TaskState::Queued, TaskState::Ready)
            | (TaskState::Ready, TaskState::Dispatched)
    );
    if allowed {
        Ok(())
    } else {
        Err(TaskError::InvalidTransition { task, from, to })
    }
}
