//! Async serial plumbing over `tokio-serial`.
//!
//! The drivers only ever see a [`DynSerial`]: a boxed `AsyncRead + AsyncWrite`
//! stream. Real hardware is opened with [`open_serial_async`]; tests hand in a
//! `tokio::io::duplex` half or a [`crate::mock_serial::MockPort`].
//!
//! ```rust,ignore
//! use mdrive_core::serial::{open_serial_async, SerialSettings};
//!
//! let settings = SerialSettings::new("/dev/ttySchneider", 9600);
//! let port = open_serial_async(&settings, "MDrive").await?;
//! ```

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

use crate::error::DriveError;

/// Byte stream a link can run over.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed [`SerialPortIO`].
pub type DynSerial = Box<dyn SerialPortIO>;

/// Boxed serial port with a `BufReader` for line-oriented replies.
///
/// The MDrive protocol is line-delimited, so `read_until(b'\n')` is the primary
/// read primitive. Bytes read into the appended buffer are kept even when the
/// surrounding timeout fires, which lets callers discard partial frames.
pub type BufferedSerial = BufReader<DynSerial>;

/// Default MDrive baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout for a single command exchange.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Port-level settings fixed at configuration time.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    /// Path to the serial device (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate (9600, 19200, ...)
    pub baud_rate: u32,
    /// Upper bound on waiting for an acknowledgment or reply line
    pub read_timeout: Duration,
}

impl SerialSettings {
    /// Settings with the default read timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Wrap a type-erased port for line reading.
pub fn buffered(port: DynSerial) -> BufferedSerial {
    BufReader::new(port)
}

/// Open `settings.port` as 8N1 without flow control.
///
/// The blocking open runs on the blocking pool.
///
/// # Errors
/// Returns [`DriveError::Connection`] if the port cannot be opened or the
/// blocking task fails.
pub async fn open_serial_async(
    settings: &SerialSettings,
    device_name: &str,
) -> Result<tokio_serial::SerialStream, DriveError> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path = settings.port.clone();
    let baud_rate = settings.baud_rate;
    let timeout = settings.read_timeout;

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
    })
    .await
    .map_err(|e| DriveError::Connection {
        port: settings.port.clone(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?;

    let port = opened.map_err(|e| DriveError::Connection {
        port: settings.port.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        port = %settings.port,
        baud_rate,
        timeout_ms = ?timeout.as_millis(),
        "Opened {} serial port",
        device_name
    );
    Ok(port)
}

/// Read and drop bytes for up to `timeout_ms`, stopping early at end of
/// stream or on a read error.
///
/// Returns how many bytes were dropped.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut scratch = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut dropped = 0;

    while let Ok(Ok(n @ 1..)) = tokio::time::timeout_at(deadline, port.read(&mut scratch)).await {
        dropped += n;
    }
    dropped
}

/// Drop whatever a `BufReader` already holds in its internal buffer.
///
/// Returns the number of bytes discarded.
pub fn discard_buffered<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> usize {
    let held = reader.buffer().len();
    reader.consume(held);
    held
}
