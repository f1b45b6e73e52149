//! Common types and utilities shared by the tensorpack accelerators
//!
//! This crate provides the foundational pieces used across the workspace:
//! the accelerator status/error type, configuration loading, logging setup,
//! dimension helpers and the small integer math the packed layout relies on.

pub mod config;
pub mod dims;
pub mod error;
pub mod logging;
pub mod math;

pub use config::{ConfigError, LogLevel, Precision, ReduceAccelConfig};
pub use dims::{count, get_dim, DimsVector};
pub use error::{AccError, AccResult};
pub use logging::{init_logging, LogFormat};
pub use math::{ceil_div, floor_pow2};
