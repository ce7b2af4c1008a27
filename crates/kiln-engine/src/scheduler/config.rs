/// Background scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Thread name prefix; workers are named `{name}-{index}`.
    pub name: String,

    /// Number of worker threads.
    ///
    /// With one worker, units run strictly in enqueue order. More workers
    /// start units in enqueue order but may finish them out of order.
    pub workers: usize,
}

impl SchedulerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "kiln-worker".to_string(),
            workers: 1,
        }
    }
}
