//! Connection Handling
//!
//! Each accepted client gets its own task running the request loop: read
//! bytes into a buffer, parse complete requests, dispatch, reply, repeat.
//! TCP is a stream, so a single read may carry half a request or several
//! whole ones — the `BytesMut` accumulation plus the incremental parser
//! handles both, which also gives pipelining for free.
//!
//! ## Why the socket is split
//!
//! A subscribed client receives `message` frames at arbitrary times, pushed
//! by whatever connection published. Replies and pushed frames must not
//! interleave mid-frame, so the write half is owned by a single writer task
//! fed from one outbound channel; the request loop and every subscription
//! delivery loop send encoded frames into it.
//!
//! ## Teardown
//!
//! When the request loop ends — clean disconnect, framing error, or I/O
//! error — every subscription registered by this connection is removed from
//! the pub/sub registry, which closes the delivery queues and ends their
//! loops.

use crate::commands::{Dispatcher, Session};
use crate::protocol::{parse, FrameError, Reply};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered, unparsed request bytes (64 KB).
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection task and its writer half.
///
/// Outbound traffic is counted in whole frames at the writer task, the one
/// place all of them pass through — so pushed `message` frames show up even
/// though no request of this connection produced them.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    opened: AtomicU64,
    live: AtomicU64,
    requests: AtomicU64,
    bytes_in: AtomicU64,
    frames_out: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub opened: u64,
    pub live: u64,
    pub requests: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an accepted client; returns how many are now live.
    pub fn client_opened(&self) -> u64 {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_closed(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error on the socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed request framing
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Client closed the connection between requests
    #[error("client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Unparsed input exceeded the buffer limit
    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// State for one client connection.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,
    addr: SocketAddr,
    buffer: BytesMut,
    dispatcher: Dispatcher,
    session: Session,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    metrics: Arc<ConnectionMetrics>,
}

impl ConnectionHandler {
    /// Splits the stream, spawns the writer task, and sets up the session.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Dispatcher,
        metrics: Arc<ConnectionMetrics>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, out_rx, Arc::clone(&metrics)));

        Self {
            reader,
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            dispatcher,
            session: Session::new(out_tx.clone()),
            out_tx,
            metrics,
        }
    }

    /// Runs the request loop to completion, then tears the connection down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let live = self.metrics.client_opened();
        info!(client = %self.addr, live, "client connected");

        let result = self.request_loop().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected");
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "connection reset by client");
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        self.teardown();
        self.metrics.client_closed();
        result
    }

    async fn request_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request_bytes) = self.try_parse()? {
                let reply = self
                    .dispatcher
                    .execute(&request_bytes, Some(&mut self.session));
                self.metrics.record_request();

                if !matches!(reply, Reply::None) {
                    self.send(reply.encode())?;
                }
            }

            self.fill_buffer().await?;
        }
    }

    /// Parses one request off the front of the buffer. On a framing error
    /// the client gets an error reply before the connection is dropped.
    fn try_parse(&mut self) -> Result<Option<crate::protocol::Request>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match parse(&self.buffer) {
            Ok(Some((request, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "parsed request"
                );
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "framing error");
                let _ = self.out_tx.send(Reply::err(&e).encode());
                Err(e.into())
            }
        }
    }

    async fn fill_buffer(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "buffer limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        let n = self.reader.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.metrics.record_read(n);
        trace!(client = %self.addr, bytes = n, "read data");
        Ok(())
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        self.out_tx
            .send(frame)
            .map_err(|_| ConnectionError::ClientDisconnected)
    }

    /// Removes every subscription this connection registered. Closing the
    /// registry senders ends the delivery loops.
    fn teardown(&mut self) {
        for (channel, id) in std::mem::take(&mut self.session.subscriptions) {
            self.dispatcher.pubsub().unsubscribe(&channel, id);
        }
    }
}

/// Drains the outbound frame channel into the socket. Ends when every
/// sender is gone or the peer stops accepting writes.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    metrics: Arc<ConnectionMetrics>,
) {
    while let Some(frame) = rx.recv().await {
        if writer.write_all(&frame).await.is_err() {
            return;
        }
        metrics.record_frame_out();
    }
    let _ = writer.shutdown().await;
}

/// Convenience entry point: builds a handler and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    metrics: Arc<ConnectionMetrics>,
) {
    let handler = ConnectionHandler::new(stream, addr, dispatcher, metrics);
    let _ = handler.run().await;
}
