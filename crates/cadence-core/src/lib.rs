//! Shared configuration and error types for the Cadence workspace.

pub mod config;
pub mod error;

pub use config::{millis_ceil, CadenceConfig, OverlapPolicy, SchedulerConfig};
pub use error::{CoreError, Result};
