use std::time::Duration;

/// Configuration shared by every hardware-bound context of a logical device.
///
/// Keep this structure stable and minimal. Add knobs only when a concrete
/// driver or workload requirement exists.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Ready tasks at the head of the open submission that trigger an
    /// automatic flush.
    ///
    /// Bounds batch latency when callers never flush explicitly.
    pub max_batch_len: usize,

    /// Slice length for fence waits on the completion worker.
    ///
    /// Between slices the worker checks whether teardown has given up.
    pub completion_poll_interval: Duration,

    /// How long teardown waits for outstanding fences before failing the
    /// remaining tasks.
    pub teardown_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_batch_len: 64,
            completion_poll_interval: Duration::from_millis(100),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}
