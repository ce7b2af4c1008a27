use std::fmt;

/// Failure reported by the native graphics/compute library.
///
/// The variants mirror the points where this crate calls into the native
/// layer. Messages are carried as strings because backends have unrelated
/// error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// Creating a native device or queue failed.
    DeviceCreation(String),
    /// Querying feature options/architecture failed.
    CapsQuery(String),
    /// The device was removed or reset.
    DeviceRemoved(String),
    /// Recording or submitting a batch failed.
    Submit(String),
    /// Waiting on a fence failed.
    Wait(String),
}

impl NativeError {
    /// Returns true if this failure means the device can no longer execute work.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, NativeError::DeviceRemoved(_) | NativeError::Wait(_))
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::DeviceCreation(msg) => write!(f, "native device creation failed: {msg}"),
            NativeError::CapsQuery(msg) => write!(f, "native capability query failed: {msg}"),
            NativeError::DeviceRemoved(msg) => write!(f, "native device removed: {msg}"),
            NativeError::Submit(msg) => write!(f, "native submission failed: {msg}"),
            NativeError::Wait(msg) => write!(f, "native fence wait failed: {msg}"),
        }
    }
}

impl std::error::Error for NativeError {}
