//! # mdrive-core
//!
//! Shared building blocks for MDrive motion drivers:
//!
//! - [`error`]: the `DriveError` type and `AppResult` alias
//! - [`serial`]: async serial port aliases and helpers over `tokio-serial`
//! - [`capabilities`]: `Movable` and `Homeable` traits for generic motion code
//! - [`mock_serial`]: channel-backed serial port for scripted tests

pub mod capabilities;
pub mod error;
pub mod mock_serial;
pub mod serial;

pub use error::{AppResult, DriveError};
