//! # mdrive_daq
//!
//! Schneider MDrive stepper axes on shared RS-485 links.
//!
//! - [`config`]: Figment-based configuration for links, axes and logging
//! - [`logging`]: tracing subscriber setup
//! - [`system`]: builds and owns the configured links and axes
//!
//! The protocol and state layers live in the `mdrive-core` and
//! `mdrive-driver-schneider` workspace crates, re-exported here.

pub mod config;
pub mod logging;
pub mod system;

pub use mdrive_core::{capabilities, error, serial};
pub use mdrive_driver_schneider as schneider;
pub use system::MdriveSystem;
