//! Custom error types for the MDrive drivers.
//!
//! This module defines the primary error type, `DriveError`, shared by the link
//! (serial transport) and axis layers. Using the `thiserror` crate, it gives a
//! single place to describe what can go wrong between a motion request and the
//! wire.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: The serial transport could not be acquired. Fatal at
//!   startup; callers terminate instead of retrying.
//! - **`ProtocolNack`**: A command was not acknowledged within the read timeout.
//!   Non-fatal; the axis records a Fault state and the command counts as failed.
//! - **`Validation`**: The caller supplied an out-of-range or unrecognised value.
//!   Raised before any wire traffic and never changes device state.
//! - **`EmptyReply`** / **`Parse`**: A reply arrived but could not be turned into
//!   the expected number or tuple.
//! - **`NotOpen`**: The link has not been opened (or has been closed).
//!
//! No variant is retried automatically; re-issuing a command is always the
//! caller's decision.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DriveError>;

/// Primary error type for link and axis operations.
#[derive(Error, Debug)]
pub enum DriveError {
    /// The serial transport could not be acquired.
    ///
    /// **Recovery Strategy**: none at runtime. Abort startup, fix the port path
    /// or permissions, restart the process.
    #[error("Failed to open serial port '{port}': {reason}")]
    Connection {
        /// Port path that was being opened
        port: String,
        /// Underlying failure description
        reason: String,
    },

    /// A command was not acknowledged before the read timeout expired.
    ///
    /// The string carries the full command as sent on the bus (axis prefix
    /// included, line terminator excluded).
    #[error("Command '{0}' not acknowledged by controller")]
    ProtocolNack(String),

    /// Rejected input, reported before any wire traffic.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mdrive_core::error::DriveError;
    ///
    /// fn check_current(percent: i64) -> Result<(), DriveError> {
    ///     if !(0..=100).contains(&percent) {
    ///         return Err(DriveError::Validation(format!(
    ///             "current must be 0-100 %, got {percent}"
    ///         )));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Validation error: {0}")]
    Validation(String),

    /// The controller answered a query with an empty line.
    #[error("Empty reply to '{0}'")]
    EmptyReply(String),

    /// A reply could not be parsed into the expected shape.
    #[error("Unexpected reply to '{command}': {reply:?}")]
    Parse {
        /// Command that was queried
        command: String,
        /// Raw reply content
        reply: String,
    },

    /// The link is not open.
    #[error("Serial link '{0}' is not open")]
    NotOpen(String),
}

impl DriveError {
    /// Whether this error means the controller did not acknowledge a command.
    ///
    /// Axis code folds every such error into the Fault operational state.
    pub fn is_nack(&self) -> bool {
        matches!(self, DriveError::ProtocolNack(_) | DriveError::NotOpen(_))
    }
}
