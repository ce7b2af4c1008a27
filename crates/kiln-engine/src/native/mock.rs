//! In-memory adapter for unit tests.
//!
//! Encoders are `Vec<u32>`: task work pushes markers that the queue records
//! in submission order. Fences either signal on submit (`auto_signal`) or
//! wait for an explicit `signal_all`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::caps::{
    Architecture, Capabilities, FeatureOptions, HardwareIds, MemoryInfo, ShaderModel,
};
use crate::time::TimestampCalibration;

use super::{AdapterDesc, FenceValue, NativeAdapter, NativeError, NativeQueue};

pub fn caps(name: &str) -> Capabilities {
    Capabilities {
        name: name.to_string(),
        hardware_ids: HardwareIds { vendor_id: 0x1414, device_id: 0x8c, subsys_id: 0, revision: 1 },
        is_mcdm: false,
        options: FeatureOptions::default(),
        shader_model: ShaderModel::new(6, 5),
        architecture: Architecture::default(),
        memory: MemoryInfo { dedicated: 4 << 30, shared: 8 << 30 },
        timestamps: TimestampCalibration::new(10_000_000, 0),
    }
}

#[derive(Default)]
pub struct MockAdapter {
    pub caps_queries: AtomicUsize,
    pub devices_created: AtomicUsize,
    pub destroyed: Arc<AtomicUsize>,
    pub caps_delay: Duration,
    pub fail_caps: bool,
    pub manual_signal: bool,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fences only signal when the test calls [`MockQueue::signal_all`].
    pub fn manual_signal(mut self) -> Self {
        self.manual_signal = true;
        self
    }

    pub fn failing_caps(mut self) -> Self {
        self.fail_caps = true;
        self
    }

    pub fn with_caps_delay(mut self, delay: Duration) -> Self {
        self.caps_delay = delay;
        self
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct MockDevice {
    destroyed: Arc<AtomicUsize>,
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct QueueState {
    next_fence: FenceValue,
    signalled: FenceValue,
    fail_submit: bool,
    fail_wait: bool,
    executed: Vec<u32>,
    batches: Vec<Vec<u32>>,
}

pub struct MockQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
    auto_signal: bool,
    destroyed: Arc<AtomicUsize>,
}

impl MockQueue {
    pub fn signal_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.signalled = state.next_fence;
        self.cv.notify_all();
    }

    pub fn fail_submits(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    pub fn fail_waits(&self, fail: bool) {
        self.state.lock().unwrap().fail_wait = fail;
        self.cv.notify_all();
    }

    /// Markers pushed by task work, in execution order.
    pub fn executed(&self) -> Vec<u32> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Markers grouped per submitted batch.
    pub fn batches(&self) -> Vec<Vec<u32>> {
        self.state.lock().unwrap().batches.clone()
    }
}

impl Drop for MockQueue {
    fn drop(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl NativeAdapter for MockAdapter {
    type Device = MockDevice;
    type Queue = MockQueue;

    fn describe(&self) -> AdapterDesc {
        AdapterDesc { name: "mock adapter".to_string(), luid: 42, is_valid: true }
    }

    fn create_device(&self) -> Result<(Arc<MockDevice>, Arc<MockQueue>), NativeError> {
        self.devices_created.fetch_add(1, Ordering::SeqCst);
        let device = Arc::new(MockDevice { destroyed: Arc::clone(&self.destroyed) });
        let queue = Arc::new(MockQueue {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
            auto_signal: !self.manual_signal,
            destroyed: Arc::clone(&self.destroyed),
        });
        Ok((device, queue))
    }

    fn query_caps(&self, _device: &MockDevice) -> Result<Capabilities, NativeError> {
        self.caps_queries.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.caps_delay);
        if self.fail_caps {
            return Err(NativeError::CapsQuery("mock failure".to_string()));
        }
        Ok(caps("mock adapter"))
    }
}

impl NativeQueue for MockQueue {
    type Encoder = Vec<u32>;

    fn begin(&self, _label: &str) -> Result<Vec<u32>, NativeError> {
        Ok(Vec::new())
    }

    fn submit(&self, encoder: Vec<u32>) -> Result<FenceValue, NativeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_submit {
            return Err(NativeError::DeviceRemoved("mock device removed".to_string()));
        }
        state.next_fence += 1;
        state.executed.extend_from_slice(&encoder);
        state.batches.push(encoder);
        if self.auto_signal {
            state.signalled = state.next_fence;
            self.cv.notify_all();
        }
        Ok(state.next_fence)
    }

    fn wait(&self, fence: FenceValue, timeout: Duration) -> Result<bool, NativeError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.fail_wait {
                return Err(NativeError::Wait("mock fence wait failed".to_string()));
            }
            if state.signalled >= fence {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self.cv.wait_timeout(state, deadline - now).unwrap().0;
        }
    }
}
