//! Dropzone Telemetry - logging and tracing for the dropzone deployment engine.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - A per-cycle tracing context so every log line emitted during one
//!   reconciliation cycle carries the same `cycle_id`
//!
//! # Example
//!
//! ```rust,no_run
//! use dropzone_telemetry::{CycleContext, CycleGuard, CycleTrigger, LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), dropzone_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("dropzone_deploy=debug");
//!
//! setup_logging(&config)?;
//!
//! let _guard = CycleGuard::new(CycleContext::new(CycleTrigger::Startup));
//! tracing::info!("Reconciling install root");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

#[cfg(feature = "config")]
mod config_bridge;
mod context;
mod error;
mod logging;

pub use context::{CycleContext, CycleGuard, CycleTrigger};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
