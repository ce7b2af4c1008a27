//! Logical devices and hardware-bound device contexts.
//!
//! This module is responsible for:
//! - caching adapter capabilities once per logical device
//! - creating, reusing and releasing contexts bound to native device/queue pairs
//! - batching ready tasks into submissions and dispatching them on background workers
//! - observing completion fences and resolving tasks

mod context;
mod error;
mod init;
mod logical;

pub use context::{DeviceContext, PoolOf};
pub use error::DeviceError;
pub use init::ContextConfig;
pub use logical::LogicalDevice;
