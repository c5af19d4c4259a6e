//! Schneider MDrive serial link
//!
//! One [`MdriveLink`] owns the RS-485 port that every MDrive on the line shares.
//! It knows nothing about axes or units; it frames commands, waits for the
//! controller's acknowledgment and reads reply lines.
//!
//! Protocol Overview:
//! - Format: ASCII, one command per line
//! - Baud: 9600 (default), 8N1, no flow control
//! - Write: `{command}\n`
//! - Acknowledge: the controller terminates its answer with `\r\n`
//! - Reply: a second `\r\n` terminated line for `PR` queries
//!
//! Every write+read pair runs under one hold of the link's async mutex, so two
//! axes on the same port can never interleave frames. An exchange that times
//! out, or whose future is dropped before it completes, flags the link for
//! resynchronisation; the next exchange discards buffered and in-flight bytes
//! before writing.
//!
//! # Example
//!
//! ```rust,ignore
//! use mdrive_core::serial::SerialSettings;
//! use mdrive_driver_schneider::MdriveLink;
//!
//! let link = MdriveLink::new(SerialSettings::new("/dev/ttySchneider", 9600));
//! link.open().await?;
//! let position = link.query("XPR P").await?;
//! ```

use mdrive_core::error::{AppResult, DriveError};
use mdrive_core::serial::{
    buffered, discard_buffered, drain_serial_buffer, open_serial_async, BufferedSerial, DynSerial,
    SerialSettings,
};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::instrument;

/// Byte sequence that acknowledges a command.
pub const ACK_TERMINATOR: &[u8] = b"\r\n";

/// Reply text returned by [`MdriveLink::write_read`] when a command is not acknowledged.
pub const NACK_SENTINEL: &str = "error";

/// How long a resynchronisation waits for stale bytes still on the wire.
const RESYNC_DRAIN_MS: u64 = 20;

/// Health of the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not yet opened, or closed explicitly
    #[default]
    Closed,
    /// Port acquired and usable
    Open,
    /// Port acquisition failed; terminal for this link instance
    Fault,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Open => "OPEN",
            ConnectionState::Fault => "FAULT",
        };
        f.write_str(label)
    }
}

struct LinkIo {
    port: Option<BufferedSerial>,
    needs_resync: bool,
}

/// Shared transport for all MDrive axes on one serial port.
pub struct MdriveLink {
    settings: SerialSettings,
    io: tokio::sync::Mutex<LinkIo>,
    state: Mutex<ConnectionState>,
}

impl fmt::Debug for MdriveLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdriveLink")
            .field("port", &self.settings.port)
            .field("baud_rate", &self.settings.baud_rate)
            .field("state", &self.state())
            .finish()
    }
}

impl MdriveLink {
    /// Create a closed link. No I/O happens until [`open`](Self::open).
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            io: tokio::sync::Mutex::new(LinkIo {
                port: None,
                needs_resync: false,
            }),
            state: Mutex::new(ConnectionState::Closed),
        }
    }

    /// Serial device path.
    pub fn port(&self) -> &str {
        &self.settings.port
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.settings.baud_rate
    }

    /// Upper bound on waiting for an acknowledgment or reply line.
    pub fn read_timeout(&self) -> Duration {
        self.settings.read_timeout
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Acquire the serial port.
    ///
    /// Opening an already open link is a no-op.
    ///
    /// # Errors
    /// Returns [`DriveError::Connection`] if the port cannot be acquired. The
    /// link then stays in [`ConnectionState::Fault`] and refuses later opens.
    #[instrument(skip(self), fields(port = %self.settings.port), err)]
    pub async fn open(&self) -> AppResult<()> {
        let mut io = self.io.lock().await;
        if self.check_openable()? {
            return Ok(());
        }

        match open_serial_async(&self.settings, "MDrive").await {
            Ok(stream) => {
                self.attach(&mut io, Box::new(stream));
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ConnectionState::Fault;
                tracing::error!("failed to open {}: {}", self.settings.port, e);
                Err(e)
            }
        }
    }

    /// Open the link over an already constructed byte stream.
    ///
    /// Used for tests and for transports opened outside this crate.
    pub async fn open_with(&self, port: DynSerial) -> AppResult<()> {
        let mut io = self.io.lock().await;
        if self.check_openable()? {
            return Ok(());
        }
        self.attach(&mut io, port);
        Ok(())
    }

    /// Returns `Ok(true)` when already open.
    fn check_openable(&self) -> AppResult<bool> {
        match self.state() {
            ConnectionState::Open => Ok(true),
            ConnectionState::Closed => Ok(false),
            ConnectionState::Fault => Err(DriveError::Connection {
                port: self.settings.port.clone(),
                reason: "link is in FAULT state after a failed open".to_string(),
            }),
        }
    }

    fn attach(&self, io: &mut LinkIo, port: DynSerial) {
        io.port = Some(buffered(port));
        io.needs_resync = false;
        *self.state.lock() = ConnectionState::Open;
        tracing::info!(
            "connected to port {} with baudrate {}",
            self.settings.port,
            self.settings.baud_rate
        );
    }

    /// Release the serial port.
    ///
    /// Idempotent. A failed shutdown is logged and the link is closed anyway.
    /// A link in Fault has no port to release and stays in Fault.
    #[instrument(skip(self), fields(port = %self.settings.port))]
    pub async fn close(&self) {
        let mut io = self.io.lock().await;
        let Some(mut port) = io.port.take() else {
            return;
        };
        if let Err(e) = port.get_mut().shutdown().await {
            tracing::warn!("failed to close {} cleanly: {}", self.settings.port, e);
        }
        io.needs_resync = false;
        *self.state.lock() = ConnectionState::Closed;
        tracing::info!("closed connection on {}", self.settings.port);
    }

    /// Send a command and wait for its acknowledgment.
    ///
    /// Returns `true` iff the acknowledgment terminator arrived before the read
    /// timeout.
    pub async fn write(&self, command: &str) -> bool {
        let mut io = self.io.lock().await;
        let acked = self.transmit(&mut io, command).await;
        if acked {
            io.needs_resync = false;
        }
        acked
    }

    /// Read one reply line with the terminator stripped.
    ///
    /// Returns an empty string on timeout.
    pub async fn read(&self) -> String {
        let mut io = self.io.lock().await;
        self.receive_line(&mut io).await
    }

    /// Send a command and read its reply under one lock hold.
    ///
    /// Returns [`NACK_SENTINEL`] if the command was not acknowledged.
    pub async fn write_read(&self, command: &str) -> String {
        let mut io = self.io.lock().await;
        if !self.transmit(&mut io, command).await {
            return NACK_SENTINEL.to_string();
        }
        self.receive_line(&mut io).await
    }

    /// Typed [`write`](Self::write).
    ///
    /// # Errors
    /// [`DriveError::NotOpen`] if the link is not open, otherwise
    /// [`DriveError::ProtocolNack`] when the command is not acknowledged.
    pub async fn command(&self, command: &str) -> AppResult<()> {
        let mut io = self.io.lock().await;
        if io.port.is_none() {
            return Err(DriveError::NotOpen(self.settings.port.clone()));
        }
        if self.transmit(&mut io, command).await {
            io.needs_resync = false;
            Ok(())
        } else {
            Err(DriveError::ProtocolNack(command.to_string()))
        }
    }

    /// Typed [`write_read`](Self::write_read).
    ///
    /// Unlike the untyped variant, a reply that happens to read `error` is
    /// returned as data.
    ///
    /// # Errors
    /// Same as [`command`](Self::command).
    pub async fn query(&self, command: &str) -> AppResult<String> {
        let mut io = self.io.lock().await;
        if io.port.is_none() {
            return Err(DriveError::NotOpen(self.settings.port.clone()));
        }
        if !self.transmit(&mut io, command).await {
            return Err(DriveError::ProtocolNack(command.to_string()));
        }
        Ok(self.receive_line(&mut io).await)
    }

    async fn transmit(&self, io: &mut LinkIo, command: &str) -> bool {
        let Some(port) = io.port.as_mut() else {
            tracing::warn!(command, "write on closed link {}", self.settings.port);
            return false;
        };

        if io.needs_resync {
            let stale = discard_buffered(port)
                + drain_serial_buffer(port.get_mut(), RESYNC_DRAIN_MS).await;
            if stale > 0 {
                tracing::debug!(stale, "discarded stale bytes before next command");
            }
        }
        // Cleared by the caller once the whole exchange has completed, so a
        // dropped future leaves the link marked for resync.
        io.needs_resync = true;

        tracing::debug!("write command: {}", command.escape_debug());
        let deadline = Instant::now() + self.settings.read_timeout;
        let frame = format!("{command}\n");

        let sent = tokio::time::timeout_at(deadline, async {
            let writer = port.get_mut();
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        })
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(command, "write failed: {}", e);
                return false;
            }
            Err(_) => {
                tracing::warn!(command, "write timed out");
                return false;
            }
        }

        let mut response = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, port.read_until(b'\n', &mut response)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    if contains_terminator(&response) {
                        return true;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(command, "read failed: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        tracing::debug!(
            command,
            partial = %String::from_utf8_lossy(&response).escape_debug(),
            "no acknowledgment within {:?}",
            self.settings.read_timeout
        );
        false
    }

    async fn receive_line(&self, io: &mut LinkIo) -> String {
        let Some(port) = io.port.as_mut() else {
            return String::new();
        };
        io.needs_resync = true;

        let mut line = Vec::new();
        let complete =
            match tokio::time::timeout(self.settings.read_timeout, port.read_until(b'\n', &mut line))
                .await
            {
                Ok(Ok(_)) => line.ends_with(b"\n"),
                Ok(Err(e)) => {
                    tracing::warn!("read failed: {}", e);
                    false
                }
                Err(_) => false,
            };

        if !complete {
            tracing::debug!("no complete reply within {:?}", self.settings.read_timeout);
            return String::new();
        }
        io.needs_resync = false;

        let reply = String::from_utf8_lossy(&line)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        tracing::debug!("read response: {}", reply);
        reply
    }
}

fn contains_terminator(response: &[u8]) -> bool {
    response
        .windows(ACK_TERMINATOR.len())
        .any(|window| window == ACK_TERMINATOR)
}
