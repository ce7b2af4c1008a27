use std::sync::Arc;
use std::time::Duration;

use crate::caps::Capabilities;

use super::NativeError;

/// Value signalled by a native queue once a submitted batch has finished.
///
/// Fence values are strictly increasing per queue.
pub type FenceValue = u64;

/// Adapter properties that are available without creating a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDesc {
    pub name: String,
    /// Locally unique adapter identifier.
    pub luid: u64,
    /// False once the adapter has been removed from the system.
    pub is_valid: bool,
}

/// One physical adapter exposed by the native library.
pub trait NativeAdapter: Send + Sync + 'static {
    /// Native device handle.
    type Device: Send + Sync + 'static;

    /// Native command queue bound to a device.
    type Queue: NativeQueue;

    fn describe(&self) -> AdapterDesc;

    /// Creates a device and its compute queue.
    ///
    /// The returned `Arc`s are the only strong references; dropping them
    /// destroys the native objects.
    fn create_device(&self) -> Result<(Arc<Self::Device>, Arc<Self::Queue>), NativeError>;

    /// Queries the capability snapshot through `device`.
    fn query_caps(&self, device: &Self::Device) -> Result<Capabilities, NativeError>;
}

/// A native command queue.
///
/// All methods are called from background scheduler threads, never from the
/// thread that submitted the tasks.
pub trait NativeQueue: Send + Sync + 'static {
    /// Recording state handed to each task's work in turn.
    type Encoder: 'static;

    /// Opens an encoder for one batch.
    fn begin(&self, label: &str) -> Result<Self::Encoder, NativeError>;

    /// Submits the recorded batch and returns the fence it will signal.
    fn submit(&self, encoder: Self::Encoder) -> Result<FenceValue, NativeError>;

    /// Blocks for at most `timeout` waiting for `fence`.
    ///
    /// Returns `Ok(true)` once the fence is reached, `Ok(false)` on timeout.
    fn wait(&self, fence: FenceValue, timeout: Duration) -> Result<bool, NativeError>;
}

/// Encoder type used by the queue of adapter `A`.
pub type EncoderOf<A> = <<A as NativeAdapter>::Queue as NativeQueue>::Encoder;
