//! Schneider MDrive drivers.
//!
//! This crate provides:
//! - [`MdriveLink`]: the shared RS-485 transport (framing, acknowledgment, reply lines)
//! - [`MdriveAxis`]: one addressable motor on a link (unit conversion, limit
//!   discovery, rate-limited status polling)
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mdrive_core::serial::SerialSettings;
//! use mdrive_driver_schneider::{AxisSettings, MdriveAxis, MdriveLink};
//!
//! let link = Arc::new(MdriveLink::new(SerialSettings::new("/dev/ttySchneider", 9600)));
//! let x = MdriveAxis::new(Arc::clone(&link), AxisSettings::new("X"));
//! let y = MdriveAxis::new(Arc::clone(&link), AxisSettings::new("Y"));
//! x.initialize().await?;
//! y.initialize().await?;
//! ```

pub mod axis;
pub mod inputs;
pub mod link;
pub mod units;

pub use axis::{AxisSettings, MdriveAxis, OperationalState, DEFAULT_POLL_INTERVAL};
pub use inputs::{InputFunction, InputMap, InputSetting, LimitState};
pub use link::{ConnectionState, MdriveLink, ACK_TERMINATOR, NACK_SENTINEL};
pub use units::MovementUnit;
