//! Background read loop for long-lived channels (log streams and the like).
//!
//! [`BackgroundReader::spawn`] takes ownership of an established
//! [`FramedChannel`] and reads from it on its own Tokio task, so the caller
//! gets a [`ReaderHandle`] back immediately.  Each chunk is forwarded to a
//! [`StreamObserver`] in arrival order.
//!
//! # Termination
//!
//! The loop ends in exactly one of three ways:
//!
//! | Cause                     | Observer sees                         |
//! |---------------------------|---------------------------------------|
//! | Token or handle cancelled | nothing further                       |
//! | Read error                | one `on_fault(error)`                 |
//! | Daemon closes the stream  | one `on_fault(ChannelError::ClosedByPeer)` |
//!
//! There are no retries: a consumer that wants the stream back opens a new
//! channel.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelError, FramedChannel};

/// Size of the buffer each read fills.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Receives what a [`BackgroundReader`] reads.
///
/// Callbacks run on the reader task; they should hand work off rather than
/// block.
pub trait StreamObserver: Send + Sync + 'static {
    /// A chunk of bytes arrived.
    fn on_data(&self, chunk: &[u8]);

    /// The stream failed.  Called at most once, after which no more calls
    /// are made.
    fn on_fault(&self, error: &ChannelError);
}

/// Drops everything it is given.
#[derive(Debug, Default)]
pub struct DiscardObserver;

impl StreamObserver for DiscardObserver {
    fn on_data(&self, _chunk: &[u8]) {}

    fn on_fault(&self, _error: &ChannelError) {}
}

/// Writes each chunk to the log, one `info!` line per text line.
#[derive(Debug)]
pub struct LogObserver {
    label: String,
}

impl LogObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl StreamObserver for LogObserver {
    fn on_data(&self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            info!("[{}] {line}", self.label);
        }
    }

    fn on_fault(&self, error: &ChannelError) {
        warn!("[{}] stream ended: {error}", self.label);
    }
}

/// What a [`ForwardingObserver`] sends down its channel.
#[derive(Debug)]
pub enum ReaderEvent {
    Data(Vec<u8>),
    /// The fault, rendered with `Display`.
    Fault(String),
}

/// Forwards every callback into an unbounded `mpsc` channel.
///
/// Unbounded so the reader never stalls on a slow consumer; the consumer
/// owns the backpressure decision by closing the receiver.
#[derive(Debug)]
pub struct ForwardingObserver {
    tx: mpsc::UnboundedSender<ReaderEvent>,
}

impl ForwardingObserver {
    /// Creates the observer together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StreamObserver for ForwardingObserver {
    fn on_data(&self, chunk: &[u8]) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.tx.send(ReaderEvent::Data(chunk.to_vec()));
    }

    fn on_fault(&self, error: &ChannelError) {
        let _ = self.tx.send(ReaderEvent::Fault(error.to_string()));
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

/// Spawns read loops.  See the module docs for the termination rules.
pub struct BackgroundReader;

impl BackgroundReader {
    /// Moves `channel` onto a new task and starts reading.
    ///
    /// The loop watches a child of `token`: cancelling `token` stops this
    /// reader along with everything else derived from it, while cancelling
    /// the returned handle stops only this reader.
    pub fn spawn<S>(
        mut channel: FramedChannel<S>,
        observer: Arc<dyn StreamObserver>,
        token: CancellationToken,
    ) -> ReaderHandle
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let token = token.child_token();
        let task_token = token.clone();
        let local_id = channel.local_id();

        let join = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let result = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        debug!("reader {local_id}: cancelled");
                        break;
                    }
                    r = channel.read_chunk(&mut buf) => r,
                };

                match result {
                    Ok(0) => {
                        debug!("reader {local_id}: end of stream");
                        observer.on_fault(&ChannelError::ClosedByPeer);
                        break;
                    }
                    Ok(n) => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        observer.on_data(&buf[..n]);
                    }
                    Err(e) => {
                        debug!("reader {local_id}: read failed: {e}");
                        observer.on_fault(&e);
                        break;
                    }
                }
            }
            channel.close().await;
        });

        ReaderHandle {
            token,
            join: Some(join),
        }
    }
}

/// Owner's handle on a running [`BackgroundReader`].
///
/// Dropping the handle cancels the reader.
#[derive(Debug)]
pub struct ReaderHandle {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Asks the reader to stop.  Returns immediately.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `true` once the read loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels the reader and waits for its task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("reader task ended abnormally: {e}");
            }
        }
    }

    /// Waits for the reader to finish on its own (fault or end of stream).
    pub async fn finished(mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("reader task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
