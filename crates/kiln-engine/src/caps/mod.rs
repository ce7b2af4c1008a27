//! Adapter capability snapshot and its one-shot cache.
//!
//! Capabilities are computed lazily, at most once per logical device, the
//! first time a context is created or a capability is queried.

mod cache;
mod capabilities;
mod error;

pub use cache::{CapsCache, InitGuard};
pub use capabilities::{
    Architecture, Capabilities, DeviceType, FeatureOptions, HardwareIds, MemoryInfo, ShaderModel,
    WaveLanes,
};
pub use error::CapsError;
