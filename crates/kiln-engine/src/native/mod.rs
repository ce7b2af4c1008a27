//! Seam between the pipeline and the native graphics/compute library.
//!
//! The pipeline only sees [`NativeAdapter`] and [`NativeQueue`]. The `wgpu`
//! backend is the production implementation; tests use an in-memory mock.

mod error;
mod traits;
mod wgpu_backend;

#[cfg(test)]
pub mod mock;

pub use error::NativeError;
pub use traits::{AdapterDesc, EncoderOf, FenceValue, NativeAdapter, NativeQueue};
pub use wgpu_backend::{WgpuAdapter, WgpuAdapterConfig, WgpuDevice, WgpuEncoder, WgpuQueue};
