//! Kiln engine crate.
//!
//! Device-side task submission and completion pipeline for a compute API
//! layered over a native graphics library:
//! - [`task`]: task records, open submissions and the shared task pool
//! - [`scheduler`]: background FIFO workers for execution and completion
//! - [`caps`]: per-adapter capability snapshot, computed once
//! - [`device`]: logical devices and their hardware-bound contexts
//! - [`native`]: the seam to the native library, with a `wgpu` backend

pub mod caps;
pub mod device;
pub mod native;
pub mod scheduler;
pub mod task;
pub mod time;

pub mod logging;

pub use caps::{Capabilities, CapsError};
pub use device::{ContextConfig, DeviceContext, DeviceError, LogicalDevice};
pub use native::{NativeAdapter, NativeError, NativeQueue};
pub use task::{TaskFailure, TaskId, TaskOutcome, TaskPool, TaskState};
