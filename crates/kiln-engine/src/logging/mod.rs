//! Logging utilities.
//!
//! This module centralizes logger initialization. The library itself only
//! uses the `log` facade; binaries call [`init_logging`] early in `main`.

mod init;

pub use init::{init_logging, LoggingConfig, DEFAULT_FILTER};
