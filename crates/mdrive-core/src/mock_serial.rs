//! Channel-backed serial port for scripted tests.
//!
//! [`new`] returns a connected pair. The [`MockPort`] end goes into the code
//! under test as a [`DynSerial`](crate::serial::DynSerial); the
//! [`MockDeviceHarness`] end stays in the test and plays the controller:
//! it sees every byte the client writes and decides what to send back.
//!
//! ```rust,ignore
//! let (port, mut harness) = mock_serial::new();
//! link.open_with(Box::new(port)).await?;
//!
//! let (reply, _) = tokio::join!(link.write_read("XPR P"), async {
//!     harness.expect_and_respond(b"XPR P\n", b"\r\n1200\r\n").await;
//! });
//! assert_eq!(reply, "1200");
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout_at, Instant};

/// How long harness expectations wait before failing a test.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Quiet period after which [`MockDeviceHarness::drain_writes`] stops.
const DRAIN_QUIET: Duration = Duration::from_millis(50);

/// Client end: bytes written here reach the harness, bytes the harness sends
/// are read here.
#[derive(Debug)]
pub struct MockPort {
    to_device: UnboundedSender<Vec<u8>>,
    from_device: UnboundedReceiver<Vec<u8>>,
    unread: VecDeque<u8>,
}

/// Controller end, owned by the test.
#[derive(Debug)]
pub struct MockDeviceHarness {
    from_client: UnboundedReceiver<Vec<u8>>,
    to_client: UnboundedSender<Vec<u8>>,
    received: Vec<u8>,
}

/// A connected port/harness pair.
pub fn new() -> (MockPort, MockDeviceHarness) {
    let (to_device, from_client) = unbounded_channel();
    let (to_client, from_device) = unbounded_channel();
    (
        MockPort {
            to_device,
            from_device,
            unread: VecDeque::new(),
        },
        MockDeviceHarness {
            from_client,
            to_client,
            received: Vec::new(),
        },
    )
}

impl AsyncRead for MockPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.unread.is_empty() {
            match this.from_device.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => this.unread.extend(chunk),
                // Harness dropped: end of stream.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let (front, _) = this.unread.as_slices();
        let n = buf.remaining().min(front.len());
        buf.put_slice(&front[..n]);
        this.unread.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let sent = self
            .to_device
            .send(buf.to_vec())
            .map(|()| buf.len())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "mock controller is gone"));
        Poll::Ready(sent)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Outcome of waiting for client bytes.
enum Pull {
    Bytes,
    Closed,
    TimedOut,
}

impl MockDeviceHarness {
    /// Append the next client write to `received`, waiting until `deadline`.
    async fn pull(&mut self, deadline: Instant) -> Pull {
        match timeout_at(deadline, self.from_client.recv()).await {
            Ok(Some(chunk)) => {
                self.received.extend_from_slice(&chunk);
                Pull::Bytes
            }
            Ok(None) => Pull::Closed,
            Err(_) => Pull::TimedOut,
        }
    }

    /// Send bytes to the client as if the controller had transmitted them.
    ///
    /// # Errors
    /// Fails once the client port has been dropped.
    pub fn send_response(&self, data: &[u8]) -> Result<(), &'static str> {
        self.to_client
            .send(data.to_vec())
            .map_err(|_| "client port dropped")
    }

    /// Assert the client's next bytes are exactly `expected`.
    ///
    /// # Panics
    /// On a mismatch, or if fewer bytes arrive within [`EXPECT_TIMEOUT`].
    pub async fn expect_write(&mut self, expected: &[u8]) {
        let deadline = Instant::now() + EXPECT_TIMEOUT;
        while self.received.len() < expected.len() {
            match self.pull(deadline).await {
                Pull::Bytes => {}
                Pull::Closed => panic!(
                    "client dropped while waiting for {:?}",
                    String::from_utf8_lossy(expected)
                ),
                Pull::TimedOut => panic!(
                    "waited {:?} for {:?}, got only {:?}",
                    EXPECT_TIMEOUT,
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.received)
                ),
            }
        }

        let head: Vec<u8> = self.received.drain(..expected.len()).collect();
        assert_eq!(
            String::from_utf8_lossy(&head),
            String::from_utf8_lossy(expected),
            "unexpected client write"
        );
    }

    /// [`expect_write`](Self::expect_write), then answer with `response`.
    pub async fn expect_and_respond(&mut self, expected: &[u8], response: &[u8]) {
        self.expect_write(expected).await;
        if let Err(e) = self.send_response(response) {
            panic!("cannot answer {:?}: {e}", String::from_utf8_lossy(expected));
        }
    }

    /// Next `\n`-terminated line written by the client, terminator stripped.
    ///
    /// `None` if no complete line arrives within `wait` or the client is gone.
    pub async fn recv_line(&mut self, wait: Duration) -> Option<String> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(end) = self.received.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.received.drain(..=end).collect();
                return Some(String::from_utf8_lossy(&line[..end]).into_owned());
            }
            match self.pull(deadline).await {
                Pull::Bytes => {}
                Pull::Closed | Pull::TimedOut => return None,
            }
        }
    }

    /// Assert the client writes nothing for `window`.
    ///
    /// # Panics
    /// If any byte is pending or arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if self.received.is_empty() {
            let _ = self.pull(Instant::now() + window).await;
        }
        assert!(
            self.received.is_empty(),
            "expected silence, client wrote {:?}",
            String::from_utf8_lossy(&self.received)
        );
    }

    /// Discard everything the client has written until it goes quiet.
    pub async fn drain_writes(&mut self) {
        while let Pull::Bytes = self.pull(Instant::now() + DRAIN_QUIET).await {}
        self.received.clear();
    }
}
