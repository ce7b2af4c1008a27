use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::{SchedulerConfig, SchedulerError};

/// A unit of background work.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub completed: u64,
    pub panicked: u64,
}

/// Cloneable enqueue endpoint of a [`BackgroundScheduler`].
///
/// Work units can hold a handle to another scheduler (execution units hand
/// off to the completion scheduler). A scheduler drains only after every
/// handle to it has been dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    name: Arc<str>,
    sender: Sender<WorkItem>,
    counters: Arc<Counters>,
}

impl SchedulerHandle {
    /// Queues `item` without blocking.
    pub fn enqueue<F>(&self, item: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(Box::new(item)).map_err(|_| {
            self.counters.enqueued.fetch_sub(1, Ordering::SeqCst);
            SchedulerError::ShutDown(self.name.to_string())
        })
    }
}

/// FIFO work queue drained by dedicated worker threads.
///
/// Enqueueing never blocks. Shutdown is a drain: every unit already queued
/// runs before the workers exit, and dropping the scheduler shuts it down.
pub struct BackgroundScheduler {
    name: Arc<str>,
    handle: Option<SchedulerHandle>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl BackgroundScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let SchedulerConfig { name, workers } = config;
        let name: Arc<str> = name.into();
        let counters = Arc::new(Counters::default());

        let (sender, receiver) = mpsc::channel::<WorkItem>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut threads = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let counters = Arc::clone(&counters);
            let thread_name = format!("{name}-{index}");
            let spawned = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&thread_name, &receiver, &counters))
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            threads.push(spawned);
        }

        log::debug!("scheduler '{name}' started with {} worker(s)", threads.len());

        Ok(Self {
            handle: Some(SchedulerHandle {
                name: Arc::clone(&name),
                sender,
                counters: Arc::clone(&counters),
            }),
            name,
            workers: threads,
            counters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an enqueue handle, or `None` after shutdown.
    pub fn handle(&self) -> Option<SchedulerHandle> {
        self.handle.clone()
    }

    /// Queues `item` without blocking.
    pub fn enqueue<F>(&self, item: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.handle {
            Some(handle) => handle.enqueue(item),
            None => Err(SchedulerError::ShutDown(self.name.to_string())),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
        }
    }

    /// Stops accepting work, runs everything already queued, and joins the workers.
    ///
    /// Blocks until outstanding handles held by other threads are dropped.
    pub fn shutdown(&mut self) {
        if self.handle.take().is_none() && self.workers.is_empty() {
            return;
        }

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("scheduler '{}' worker terminated abnormally", self.name);
            }
        }

        let stats = self.stats();
        log::debug!(
            "scheduler '{}' drained: {} enqueued, {} completed, {} panicked",
            self.name,
            stats.enqueued,
            stats.completed,
            stats.panicked
        );
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(thread_name: &str, receiver: &Mutex<Receiver<WorkItem>>, counters: &Counters) {
    loop {
        // The receiver lock is released before the item runs so other workers
        // can pick up the next unit.
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();

        let Ok(item) = next else {
            // Every sender is gone and the queue is empty.
            break;
        };

        if panic::catch_unwind(AssertUnwindSafe(item)).is_err() {
            log::error!("{thread_name}: work item panicked");
            counters.panicked.fetch_add(1, Ordering::SeqCst);
        }
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }
}
