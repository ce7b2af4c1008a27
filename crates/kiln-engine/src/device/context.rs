use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use state::InitCell;

use crate::caps::Capabilities;
use crate::native::{EncoderOf, FenceValue, NativeAdapter, NativeError, NativeQueue};
use crate::scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
use crate::task::{
    ClosedSubmission, ContextId, TaskFailure, TaskId, TaskOutcome, TaskPool, TaskPoolLock,
    TaskState,
};
use crate::time::TimestampCalibration;

use super::{ContextConfig, DeviceError};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Task pool type used by contexts of adapter `A`.
pub type PoolOf<A> = TaskPool<EncoderOf<A>>;

/// Native handles a context is bound to.
struct Binding<A: NativeAdapter> {
    device: Arc<A::Device>,
    queue: Arc<A::Queue>,
}

struct Schedulers {
    execution: BackgroundScheduler,
    completion: BackgroundScheduler,
}

/// State shared with work units running on the context's workers.
struct Shared {
    id: ContextId,
    /// Set once, on the first device-wide failure.
    lost: InitCell<String>,
    /// Set once teardown starts; completion waits give up after it.
    drain_deadline: InitCell<Instant>,
    poll_interval: Duration,
}

impl Shared {
    fn record_loss(&self, reason: String) {
        if self.lost.set(reason) {
            log::error!(
                "{}: device lost: {}",
                self.id,
                self.lost.try_get().map(String::as_str).unwrap_or_default()
            );
        }
    }

    fn lost(&self) -> Option<&str> {
        self.lost.try_get().map(String::as_str)
    }
}

/// Hardware-bound device context: one native device/queue pair plus its
/// execution and completion workers.
///
/// Every mutating call takes the task-pool lock as an explicit
/// [`TaskPoolLock`] argument.
pub struct DeviceContext<A: NativeAdapter> {
    shared: Arc<Shared>,
    imported: bool,
    config: ContextConfig,
    timestamps: TimestampCalibration,
    pool: Arc<PoolOf<A>>,
    binding: Mutex<Option<Binding<A>>>,
    schedulers: Mutex<Option<Schedulers>>,
    /// Written under the task-pool lock.
    released: AtomicBool,
}

impl<A: NativeAdapter> DeviceContext<A> {
    pub(crate) fn new(
        device: Arc<A::Device>,
        queue: Arc<A::Queue>,
        imported: bool,
        caps: &Capabilities,
        pool: Arc<PoolOf<A>>,
        config: ContextConfig,
    ) -> Result<Self, DeviceError> {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));

        let execution = BackgroundScheduler::new(SchedulerConfig::named(format!("kiln-exec-{}", id.0)))?;
        let completion = BackgroundScheduler::new(SchedulerConfig::named(format!("kiln-done-{}", id.0)))?;

        log::info!(
            "{id}: created on '{}' ({})",
            caps.name,
            if imported { "imported handles" } else { "owned handles" }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                lost: InitCell::new(),
                drain_deadline: InitCell::new(),
                poll_interval: config.completion_poll_interval,
            }),
            imported,
            timestamps: caps.timestamps,
            config,
            pool,
            binding: Mutex::new(Some(Binding { device, queue })),
            schedulers: Mutex::new(Some(Schedulers { execution, completion })),
            released: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    /// True if the native handles were supplied by the caller.
    pub fn is_imported(&self) -> bool {
        self.imported
    }

    pub fn pool(&self) -> &Arc<PoolOf<A>> {
        &self.pool
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Reason of the device loss, if one was recorded.
    pub fn device_lost(&self) -> Option<String> {
        self.shared.lost().map(str::to_string)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// GPU timestamp ticks per second.
    pub fn timestamp_frequency(&self) -> u64 {
        self.timestamps.frequency
    }

    /// Offset added to converted GPU timestamps to land on the CPU clock.
    pub fn gpu_to_cpu_timestamp_offset(&self) -> i64 {
        self.timestamps.gpu_to_cpu_offset_ns
    }

    pub fn timestamps(&self) -> TimestampCalibration {
        self.timestamps
    }

    /// The native device, or `None` after teardown.
    pub fn native_device(&self) -> Option<Arc<A::Device>> {
        self.binding().as_ref().map(|b| Arc::clone(&b.device))
    }

    /// The native queue, or `None` after teardown.
    pub fn native_queue(&self) -> Option<Arc<A::Queue>> {
        self.binding().as_ref().map(|b| Arc::clone(&b.queue))
    }

    /// Execution and completion scheduler counters, or `None` after teardown.
    pub fn scheduler_stats(&self) -> Option<(SchedulerStats, SchedulerStats)> {
        self.schedulers()
            .as_ref()
            .map(|s| (s.execution.stats(), s.completion.stats()))
    }

    /// True if this context is bound to exactly these handles.
    pub(crate) fn binds(&self, device: &Arc<A::Device>, queue: &Arc<A::Queue>) -> bool {
        self.binding()
            .as_ref()
            .is_some_and(|b| Arc::ptr_eq(&b.device, device) && Arc::ptr_eq(&b.queue, queue))
    }

    /// Appends `task` to the open submission (Created → Queued).
    ///
    /// After a device loss the task is resolved with a failure so that
    /// waiters never hang, and the loss is returned.
    pub fn submit_task(
        &self,
        task: TaskId,
        lock: &mut TaskPoolLock<'_, EncoderOf<A>>,
    ) -> Result<(), DeviceError> {
        self.ensure_live()?;
        self.ensure_own_lock(lock)?;

        if let Some(reason) = self.shared.lost() {
            if lock.state(task)? == TaskState::Created {
                lock.complete(task, Err(TaskFailure::DeviceLost(reason.to_string())));
            }
            return Err(DeviceError::DeviceLost(reason.to_string()));
        }

        lock.enqueue(self.id(), task)?;
        log::trace!("{}: queued {task}", self.id());
        Ok(())
    }

    /// Marks `task` ready (Queued → Ready).
    ///
    /// Flushes automatically once the ready prefix reaches
    /// [`ContextConfig::max_batch_len`].
    pub fn ready_task(
        &self,
        task: TaskId,
        lock: &mut TaskPoolLock<'_, EncoderOf<A>>,
    ) -> Result<(), DeviceError> {
        self.ensure_live()?;
        self.ensure_own_lock(lock)?;

        let ready = lock.mark_ready(self.id(), task)?;
        if ready >= self.config.max_batch_len.max(1) {
            log::trace!("{}: {ready} ready tasks, flushing", self.id());
            self.flush(lock)?;
        }
        Ok(())
    }

    /// Closes the ready prefix of the open submission and hands it to the
    /// execution worker.
    ///
    /// The first task that is not ready, and everything queued after it,
    /// stays in the open submission. Nothing ready means nothing happens.
    /// Never waits for completion.
    pub fn flush(&self, lock: &mut TaskPoolLock<'_, EncoderOf<A>>) -> Result<(), DeviceError> {
        self.ensure_live()?;
        self.ensure_own_lock(lock)?;

        if let Some(reason) = self.shared.lost() {
            let failed = lock.fail_open(self.id(), TaskFailure::DeviceLost(reason.to_string()));
            if failed > 0 {
                log::warn!("{}: failed {failed} open task(s) after device loss", self.id());
            }
            return Err(DeviceError::DeviceLost(reason.to_string()));
        }

        let Some(submission) = lock.close_ready_prefix(self.id()) else {
            return Ok(());
        };
        log::debug!(
            "{}: flushing batch {} ({} task(s))",
            self.id(),
            submission.serial(),
            submission.len()
        );

        let ids = submission.task_ids();
        let enqueued = match self.dispatcher() {
            Some((dispatcher, execution)) => execution
                .enqueue(move || dispatcher.execute_tasks(submission))
                .map_err(DeviceError::from),
            None => Err(DeviceError::ContextReleased(self.id())),
        };

        if let Err(err) = enqueued {
            // The closures (and the work inside them) are gone; resolve the
            // tasks here so nobody waits forever.
            lock.complete_all(&ids, &Err(TaskFailure::Cancelled));
            return Err(err);
        }
        Ok(())
    }

    /// Blocks until `task` completes, flushing first if it is still open.
    ///
    /// The flush only closes the ready prefix, so the wait stays blocked
    /// while `task` is not ready or while any task queued before it on this
    /// context is not ready. Use [`DeviceContext::wait_timeout`] when either
    /// can happen.
    pub fn wait(&self, task: TaskId) -> Result<TaskOutcome, DeviceError> {
        let lock = self.flush_for_wait(task);
        Ok(lock.wait_until_complete(task)?)
    }

    /// Like [`DeviceContext::wait`] but gives up after `timeout`.
    pub fn wait_timeout(
        &self,
        task: TaskId,
        timeout: Duration,
    ) -> Result<Option<TaskOutcome>, DeviceError> {
        let lock = self.flush_for_wait(task);
        Ok(lock.wait_until_complete_for(task, timeout)?)
    }

    fn flush_for_wait(&self, task: TaskId) -> TaskPoolLock<'_, EncoderOf<A>> {
        let mut lock = self.pool.lock();
        if lock.is_open(self.id(), task) {
            if let Err(err) = self.flush(&mut lock) {
                log::debug!("{}: flush before wait on {task}: {err}", self.id());
            }
        }
        lock
    }

    /// Flushes, drains both workers, resolves stragglers and drops the
    /// native handles. Idempotent.
    ///
    /// Must not be called with the task-pool lock held.
    pub(crate) fn teardown(&self) {
        if self.is_released() {
            return;
        }
        let id = self.id();

        {
            let mut lock = self.pool.lock();
            if self.is_released() {
                return;
            }
            if let Err(err) = self.flush(&mut lock) {
                log::debug!("{id}: final flush: {err}");
            }
            self.released.store(true, Ordering::SeqCst);

            let stragglers = lock.unregister_context(id);
            if !stragglers.is_empty() {
                log::warn!("{id}: cancelling {} task(s) never marked ready", stragglers.len());
                lock.complete_all(&stragglers, &Err(TaskFailure::Cancelled));
            }
        }

        let Some(mut schedulers) = self.schedulers().take() else {
            return;
        };
        let _ = self
            .shared
            .drain_deadline
            .set(Instant::now() + self.config.teardown_timeout);

        // Execution first: its units hand off to the completion worker.
        schedulers.execution.shutdown();
        schedulers.completion.shutdown();

        let binding = self.binding().take();
        drop(binding);
        log::info!("{id}: released");
    }

    fn ensure_live(&self) -> Result<(), DeviceError> {
        if self.is_released() {
            return Err(DeviceError::ContextReleased(self.id()));
        }
        Ok(())
    }

    fn ensure_own_lock(&self, lock: &TaskPoolLock<'_, EncoderOf<A>>) -> Result<(), DeviceError> {
        if !lock.belongs_to(&self.pool) {
            log::error!("{}: rejected a lock taken on another task pool", self.id());
            return Err(DeviceError::ForeignPoolLock);
        }
        Ok(())
    }

    fn dispatcher(&self) -> Option<(Dispatcher<A>, SchedulerHandle)> {
        let queue = self.native_queue()?;
        let schedulers = self.schedulers();
        let schedulers = schedulers.as_ref()?;
        let dispatcher = Dispatcher {
            shared: Arc::clone(&self.shared),
            pool: Arc::clone(&self.pool),
            queue,
            completion: schedulers.completion.handle()?,
        };
        Some((dispatcher, schedulers.execution.handle()?))
    }

    fn binding(&self) -> MutexGuard<'_, Option<Binding<A>>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedulers(&self) -> MutexGuard<'_, Option<Schedulers>> {
        self.schedulers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: NativeAdapter> Drop for DeviceContext<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<A: NativeAdapter> std::fmt::Debug for DeviceContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.id())
            .field("imported", &self.imported)
            .field("released", &self.is_released())
            .field("lost", &self.shared.lost())
            .finish_non_exhaustive()
    }
}

/// Everything a work unit needs, detached from the context itself.
struct Dispatcher<A: NativeAdapter> {
    shared: Arc<Shared>,
    pool: Arc<PoolOf<A>>,
    queue: Arc<A::Queue>,
    completion: SchedulerHandle,
}

impl<A: NativeAdapter> Dispatcher<A> {
    /// Runs on the execution worker: records the batch, submits it and hands
    /// the fence to the completion worker.
    fn execute_tasks(self, submission: ClosedSubmission<EncoderOf<A>>) {
        let id = self.shared.id;
        let serial = submission.serial();
        let ids = submission.task_ids();

        if let Some(reason) = self.shared.lost() {
            let failure = Err(TaskFailure::DeviceLost(reason.to_string()));
            self.pool.lock().complete_all(&ids, &failure);
            return;
        }

        self.pool.lock().mark_dispatched(&ids);

        let label = submission_label(id, serial);
        let recorded =
            panic::catch_unwind(AssertUnwindSafe(|| self.record_and_submit(&label, submission)));
        let (fence, outcomes) = match recorded {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                log::error!("{id}: batch {serial} failed: {err}");
                self.fail_device(&ids, &err);
                return;
            }
            Err(payload) => {
                let reason = panic_message(&*payload);
                log::error!("{id}: batch {serial} panicked during submission: {reason}");
                let failure = Err(TaskFailure::Dispatch(format!("panicked: {reason}")));
                self.pool.lock().complete_all(&ids, &failure);
                return;
            }
        };
        log::trace!("{id}: batch {serial} submitted at fence {fence}");

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let queue = Arc::clone(&self.queue);
        let handed = self
            .completion
            .enqueue(move || await_completion::<A>(&shared, &pool, &queue, fence, outcomes));

        if let Err(err) = handed {
            log::error!("{id}: completion worker unavailable: {err}");
            self.fail_device(&ids, &NativeError::Wait(err.to_string()));
        }
    }

    /// Records every task into one encoder in order and submits it.
    ///
    /// A task whose own recording fails or panics is failed alone; the rest
    /// of the batch still goes out.
    fn record_and_submit(
        &self,
        label: &str,
        submission: ClosedSubmission<EncoderOf<A>>,
    ) -> Result<(FenceValue, Vec<(TaskId, TaskOutcome)>), NativeError> {
        let mut encoder = self.queue.begin(label)?;

        let mut outcomes = Vec::with_capacity(submission.len());
        for (task, work) in submission.into_entries() {
            match panic::catch_unwind(AssertUnwindSafe(|| work(&mut encoder))) {
                Ok(Ok(())) => outcomes.push((task, Ok(()))),
                Ok(Err(err)) if err.is_device_loss() => return Err(err),
                Ok(Err(err)) => {
                    log::warn!("{task}: recording failed: {err}");
                    outcomes.push((task, Err(TaskFailure::Dispatch(err.to_string()))));
                }
                Err(payload) => {
                    let reason = panic_message(&*payload);
                    log::error!("{task}: recording panicked: {reason}");
                    outcomes.push((task, Err(TaskFailure::Dispatch(format!("panicked: {reason}")))));
                }
            }
        }

        let fence = self.queue.submit(encoder)?;
        Ok((fence, outcomes))
    }

    fn fail_device(&self, ids: &[TaskId], err: &NativeError) {
        self.shared.record_loss(err.to_string());
        let mut lock = self.pool.lock();
        lock.complete_all(ids, &Err(TaskFailure::from_native(err)));
        lock.fail_open(self.shared.id, TaskFailure::DeviceLost(err.to_string()));
    }
}

/// Runs on the completion worker: waits for `fence` in poll-interval slices
/// and resolves the batch in order.
fn await_completion<A: NativeAdapter>(
    shared: &Shared,
    pool: &PoolOf<A>,
    queue: &A::Queue,
    fence: FenceValue,
    outcomes: Vec<(TaskId, TaskOutcome)>,
) {
    let ids: Vec<TaskId> = outcomes.iter().map(|(id, _)| *id).collect();

    loop {
        match queue.wait(fence, shared.poll_interval) {
            Ok(true) => {
                let mut lock = pool.lock();
                for (task, outcome) in outcomes {
                    lock.complete(task, outcome);
                }
                return;
            }
            Ok(false) => {
                let expired = shared
                    .drain_deadline
                    .try_get()
                    .is_some_and(|deadline| Instant::now() >= *deadline);
                if expired {
                    log::warn!(
                        "{}: fence {fence} not signalled before teardown deadline; failing {} task(s)",
                        shared.id,
                        ids.len()
                    );
                    pool.lock().complete_all(&ids, &Err(TaskFailure::DrainTimedOut));
                    return;
                }
            }
            Err(err) => {
                shared.record_loss(err.to_string());
                let mut lock = pool.lock();
                lock.complete_all(&ids, &Err(TaskFailure::from_native(&err)));
                lock.fail_open(shared.id, TaskFailure::DeviceLost(err.to_string()));
                return;
            }
        }
    }
}

fn submission_label(context: ContextId, serial: u64) -> String {
    format!("kiln {context} batch {serial}")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
