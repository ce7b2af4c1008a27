//! Time subsystem.
//!
//! Provides task profiling timestamps and GPU/CPU clock calibration without
//! coupling to the scheduling code.
//! Intended usage:
//! - the task pool stamps a `TaskProfile` as tasks change state
//! - capabilities carry a `TimestampCalibration` for converting GPU ticks

mod calibration;
mod profile;

pub use calibration::TimestampCalibration;
pub use profile::TaskProfile;
