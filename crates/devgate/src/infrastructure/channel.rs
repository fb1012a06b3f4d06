//! One logical daemon channel over one transport connection.
//!
//! A [`FramedChannel`] wraps an exclusively-owned byte stream (a TCP socket in
//! production, an in-memory mock in tests) and speaks the host protocol on it:
//!
//! ```text
//! gateway                                daemon
//!    │ ── 000chost:devices ───────────────► │
//!    │ ◄───────────────────────────── OKAY  │   command accepted
//!    │ ◄──────────── 0018A\tdevice\n...     │   payload (command-specific)
//!
//!    │ ── 0013host:transport:nope ────────► │
//!    │ ◄──────── FAIL0010device not found   │   command rejected, message verbatim
//! ```
//!
//! # Channel states
//!
//! ```text
//! Opening ──(every opening command OKAY)──► Established ──(close / violation)──► Closed
//! ```
//!
//! A status that is neither `OKAY` nor `FAIL` means the two sides disagree
//! about where they are in the byte stream.  Nothing read afterwards can be
//! trusted, so the channel drops its transport and refuses further use.
//!
//! # Why is the channel generic over the stream? (for beginners)
//!
//! `FramedChannel<S>` accepts any `S` that implements Tokio's `AsyncRead` and
//! `AsyncWrite`.  Production code passes a `TcpStream`; unit tests pass a
//! scripted `tokio_test::io::Mock` that asserts the exact bytes written and
//! plays back canned replies, so the framing rules are tested without sockets.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use devgate_core::protocol::{
    decode_length, decode_text, encode_request, HostCommand, LocalId, ProtocolError, RemoteId,
    Status, LENGTH_HEADER_SIZE, STATUS_SIZE,
};

use super::reader::{BackgroundReader, ReaderHandle, StreamObserver};

/// Error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("framing error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The daemon answered `FAIL`; the message is passed through verbatim.
    #[error("{0}")]
    CommandFailed(String),

    /// The daemon answered with an unknown status code.
    #[error("protocol violation: unexpected status {}", String::from_utf8_lossy(.0))]
    ProtocolViolation([u8; STATUS_SIZE]),

    /// The daemon closed the connection mid-exchange or mid-stream.
    #[error("closed by peer")]
    ClosedByPeer,

    /// The channel was already closed locally or after a violation.
    #[error("channel is closed")]
    Closed,
}

/// Lifecycle state of a [`FramedChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Established,
    Closed,
}

/// A host-protocol channel over an exclusively-owned stream.
pub struct FramedChannel<S> {
    local_id: LocalId,
    remote_id: RemoteId,
    state: ChannelState,
    stream: Option<S>,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps `stream` without sending anything.  The channel starts `Opening`.
    pub fn new(stream: S, local_id: LocalId, remote_id: RemoteId) -> Self {
        Self {
            local_id,
            remote_id,
            state: ChannelState::Opening,
            stream: Some(stream),
        }
    }

    /// Wraps `stream` and sends each opening command in order.
    ///
    /// The channel is `Established` once every command has been answered
    /// with `OKAY`.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the transport is dropped with the channel.
    pub async fn open(
        stream: S,
        local_id: LocalId,
        remote_id: RemoteId,
        commands: &[HostCommand],
    ) -> Result<Self, ChannelError> {
        let mut channel = Self::new(stream, local_id, remote_id);
        for command in commands {
            channel.send(command).await?;
        }
        channel.state = ChannelState::Established;
        debug!("channel {local_id}: established after {} command(s)", commands.len());
        Ok(channel)
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn remote_id(&self) -> RemoteId {
        self.remote_id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Sends a typed command and waits for its status.
    ///
    /// # Errors
    ///
    /// See [`FramedChannel::send_command`].
    pub async fn send(&mut self, command: &HostCommand) -> Result<(), ChannelError> {
        self.send_command(&command.to_wire()).await
    }

    /// Frames `command`, writes it and reads the 4-byte status.
    ///
    /// On `OKAY` the stream is left positioned at the command's payload.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Protocol`] if `command` is too long; nothing is written.
    /// - [`ChannelError::CommandFailed`] with the daemon's message on `FAIL`.
    /// - [`ChannelError::ProtocolViolation`] on any other status; the channel
    ///   is closed.
    /// - [`ChannelError::Protocol`] if a `FAIL` message has a malformed length;
    ///   the channel is closed.
    /// - [`ChannelError::ClosedByPeer`] if the daemon hangs up first.
    pub async fn send_command(&mut self, command: &str) -> Result<(), ChannelError> {
        let frame = encode_request(command)?;
        let local_id = self.local_id;
        let stream = self.stream_mut()?;

        stream.write_all(&frame).await?;
        stream.flush().await?;

        let mut status = [0u8; STATUS_SIZE];
        read_exact(stream, &mut status).await?;

        match Status::parse(status) {
            Ok(Status::Okay) => {
                debug!("channel {local_id}: {command} -> OKAY");
                Ok(())
            }
            Ok(Status::Fail) => {
                let payload = match self.read_length_prefixed().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        // The error block was unreadable; framing is lost.
                        warn!("channel {local_id}: unreadable FAIL reply to {command}: {e}");
                        self.abandon();
                        return Err(e);
                    }
                };
                let message = String::from_utf8_lossy(&payload).into_owned();
                debug!("channel {local_id}: {command} -> FAIL {message}");
                Err(ChannelError::CommandFailed(message))
            }
            Err(_) => {
                warn!(
                    "channel {local_id}: protocol violation after {command}: status {:?}",
                    String::from_utf8_lossy(&status)
                );
                self.abandon();
                Err(ChannelError::ProtocolViolation(status))
            }
        }
    }

    /// Reads one `[len:4 hex][payload]` block.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Protocol`] for a malformed length header and
    /// [`ChannelError::ClosedByPeer`] if the block is cut short.
    pub async fn read_length_prefixed(&mut self) -> Result<Vec<u8>, ChannelError> {
        let stream = self.stream_mut()?;
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        read_exact(stream, &mut header).await?;
        let len = decode_length(header)?;
        let mut payload = vec![0u8; len];
        read_exact(stream, &mut payload).await?;
        Ok(payload)
    }

    /// Reads one length-prefixed block as UTF-8 text.
    ///
    /// # Errors
    ///
    /// As [`FramedChannel::read_length_prefixed`], plus
    /// [`ProtocolError::InvalidUtf8`].
    pub async fn read_length_prefixed_text(&mut self) -> Result<String, ChannelError> {
        let payload = self.read_length_prefixed().await?;
        Ok(decode_text(&payload)?)
    }

    /// Drains the stream until the daemon closes it.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ChannelError> {
        let stream = self.stream_mut()?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Drains the stream as text, replacing invalid UTF-8 sequences.
    pub async fn read_to_string(&mut self) -> Result<String, ChannelError> {
        let bytes = self.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Performs one read into `buf`.  `Ok(0)` means end of stream.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let stream = self.stream_mut()?;
        Ok(stream.read(buf).await?)
    }

    /// Shuts the transport down and marks the channel `Closed`.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("channel {}: shutdown error ignored: {e}", self.local_id);
            }
        }
        self.state = ChannelState::Closed;
    }

    /// Gives up framing and returns the raw transport.
    ///
    /// Used once a channel has been switched to a device transport and only
    /// raw bytes follow.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the transport was already released.
    pub fn into_inner(mut self) -> Result<S, ChannelError> {
        self.stream.take().ok_or(ChannelError::Closed)
    }

    /// Drops the transport without a shutdown handshake.
    fn abandon(&mut self) {
        self.stream = None;
        self.state = ChannelState::Closed;
    }

    fn stream_mut(&mut self) -> Result<&mut S, ChannelError> {
        if self.state == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        self.stream.as_mut().ok_or(ChannelError::Closed)
    }
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Hands the channel to a [`BackgroundReader`] and returns immediately.
    ///
    /// Every chunk read is passed to `observer` in order until `token` (or the
    /// returned handle) is cancelled, or a read fails.
    pub fn create_reader(
        self,
        observer: Arc<dyn StreamObserver>,
        token: CancellationToken,
    ) -> ReaderHandle {
        BackgroundReader::spawn(self, observer, token)
    }
}

async fn read_exact<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), ChannelError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ChannelError::ClosedByPeer),
        Err(e) => Err(ChannelError::Io(e)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
