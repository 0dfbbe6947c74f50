//! Line-framed transport and I/O loop.
//!
//! This module owns one socket to one server. Outgoing frames are written
//! newline-terminated; incoming bytes are buffered until a full line is
//! available, decoded, and handed to the owner as [`Incoming`] messages.
//!
//! # I/O Loop
//!
//! The transport spawns a tokio task that handles:
//!
//! - Incoming lines from the server (decoded to responses/notifications)
//! - Outgoing frames queued by [`Transport::send`]
//! - Shutdown requests from [`Transport::close`]
//!
//! When the loop ends for any reason the inbound channel is closed, which
//! is how the owner learns that the connection is gone.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use std::io::ErrorKind;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::Incoming;

use super::stream::{BoxedSocket, Connector};

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted line. Verbose transactions and long histories can be large.
const MAX_FRAME_LENGTH: usize = 32 * 1024 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Receiving end of decoded server messages.
///
/// Yields `None` once the transport has closed.
pub type InboundReceiver = mpsc::UnboundedReceiver<Incoming>;

/// One decoded line, or a line that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Line(String),
    /// Longer than the frame limit; discarded up to the next newline.
    Oversized,
    /// Not valid UTF-8.
    InvalidUtf8,
}

// ============================================================================
// FrameCodec
// ============================================================================

/// [`LinesCodec`] that reports bad lines as items instead of errors.
///
/// `Framed` ends the stream after the first decode error, so every
/// recoverable line error has to surface as an item.
struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn recover(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<Frame>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(LinesCodecError::Io(e)) if e.kind() == ErrorKind::InvalidData => {
                Ok(Some(Frame::InvalidUtf8))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        Self::recover(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        Self::recover(self.lines.decode_eof(buf))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        self.lines.encode(line, buf)
    }
}

/// Internal commands for the I/O loop.
enum TransportCommand {
    /// Write one frame.
    Send(String),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Transport
// ============================================================================

/// One open socket with newline framing.
///
/// # Thread Safety
///
/// `Transport` is `Send + Sync`; `send` never blocks.
#[derive(Clone)]
pub struct Transport {
    /// Channel to the I/O loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Cleared when the I/O loop exits.
    open: Arc<AtomicBool>,
    /// Cancelled when the I/O loop exits.
    closed: CancellationToken,
}

impl Transport {
    /// Dials `server` through `connector` and starts the I/O loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the socket cannot be opened.
    pub async fn connect(
        connector: &dyn Connector,
        server: &ServerConfig,
    ) -> Result<(Self, InboundReceiver)> {
        let socket = connector.connect(server).await?;
        debug!(%server, "Transport connected");
        Ok(Self::open(socket))
    }

    /// Starts the I/O loop over an already-open socket.
    pub fn open(socket: BoxedSocket) -> (Self, InboundReceiver) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let closed = CancellationToken::new();

        tokio::spawn(Self::run_io_loop(
            Framed::new(socket, FrameCodec::new(MAX_FRAME_LENGTH)),
            command_rx,
            inbound_tx,
            Arc::clone(&open),
            closed.clone(),
        ));

        (
            Self {
                command_tx,
                open,
                closed,
            },
            inbound_rx,
        )
    }

    /// Queues one frame for writing. The newline is appended by the codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`] if the transport is closed.
    pub fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::write("transport is closed"));
        }

        self.command_tx
            .send(TransportCommand::Send(frame))
            .map_err(|_| Error::write("transport is closed"))
    }

    /// Serializes `message` and queues it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails, [`Error::Write`] if closed.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        self.send(frame)
    }

    /// Returns `true` while the I/O loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Waits until the transport has closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Closes the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.command_tx.send(TransportCommand::Shutdown);
    }

    /// The I/O loop.
    async fn run_io_loop(
        framed: Framed<BoxedSocket, FrameCodec>,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        inbound_tx: mpsc::UnboundedSender<Incoming>,
        open: Arc<AtomicBool>,
        closed: CancellationToken,
    ) {
        let (mut sink, mut stream) = framed.split();

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Frame::Line(line))) => Self::handle_line(&line, &inbound_tx),

                        Some(Ok(Frame::Oversized)) => {
                            warn!(max = MAX_FRAME_LENGTH, "Dropping oversized frame");
                        }

                        Some(Ok(Frame::InvalidUtf8)) => {
                            warn!("Dropping frame with invalid UTF-8");
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Socket read error");
                            break;
                        }

                        None => {
                            debug!("Socket closed by server");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send(frame)) => {
                            trace!(len = frame.len(), "Writing frame");
                            if let Err(e) = sink.send(frame).await {
                                error!(error = %e, "Socket write error");
                                break;
                            }
                        }

                        Some(TransportCommand::Shutdown) | None => {
                            debug!("Transport shutdown requested");
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
        }

        open.store(false, Ordering::Release);
        closed.cancel();

        debug!("Transport I/O loop terminated");
    }

    /// Decodes one line and forwards each message to the owner.
    fn handle_line(line: &str, inbound_tx: &mpsc::UnboundedSender<Incoming>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let messages = match Incoming::parse_line(line) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, frame = %line, "Dropping malformed frame");
                return;
            }
        };

        for message in messages {
            match message {
                Ok(incoming) => {
                    let _ = inbound_tx.send(incoming);
                }
                Err(e) => warn!(error = %e, "Dropping malformed message"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
