//! Async message transport shared by both roles.
//!
//! * [`MessageReader`] turns any `AsyncRead` into a stream of [`Message`]s.
//! * [`spawn_writer`] hands the write half to a dedicated task.  Everything
//!   that wants to talk to the peer goes through the returned [`Outbox`], so
//!   the write half has exactly one owner.
//!
//! Neither type knows about sockets: tests drive them over
//! `tokio::io::duplex` and `tokio_test::io` mocks.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::codec::{encode_message, FrameBuffer, ProtocolError};
use crate::protocol::handshake::HandshakeError;
use crate::protocol::messages::{Message, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Number of outbound messages that may wait for the writer.
pub const OUTBOX_CAPACITY: usize = 64;

/// Errors that end (or refuse) a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("no liveness signal within {0:?}")]
    LivenessTimeout(Duration),

    /// A message nobody handles.  Only fatal under `UnknownTypePolicy::FailClosed`.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The peer closed the connection, or the session's outbound queue is gone.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Whether the peer should get a best-effort `Error` message before the
    /// connection closes.  Not worth trying once the connection itself failed.
    pub fn should_notify_peer(&self) -> bool {
        !matches!(self, SessionError::ConnectionClosed | SessionError::Io(_))
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Reads framed messages from an async byte stream.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
    frames: FrameBuffer,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames: FrameBuffer::new(),
            chunk: vec![0u8; HEADER_SIZE + MAX_PAYLOAD_SIZE].into_boxed_slice(),
        }
    }

    /// Returns the next message, or `Ok(None)` when the peer closed the
    /// stream cleanly between frames.
    ///
    /// Cancellation-safe: bytes are buffered only after a read completes, so
    /// dropping this future inside `select!` loses nothing.
    ///
    /// # Errors
    ///
    /// * [`SessionError::UnknownMessageType`] – the frame was skipped; reading
    ///   may continue.
    /// * [`SessionError::Decode`] – the stream is corrupt, or ended mid-frame
    ///   ([`ProtocolError::Truncated`]).
    /// * [`SessionError::Io`] – the underlying read failed.
    pub async fn next_message(&mut self) -> Result<Option<Message>, SessionError> {
        loop {
            match self.frames.next_message() {
                Ok(Some(msg)) => return Ok(Some(msg)),
                Ok(None) => {}
                Err(ProtocolError::UnknownMessageType { tag, .. }) => {
                    return Err(SessionError::UnknownMessageType(tag))
                }
                Err(e) => return Err(SessionError::Decode(e)),
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                let buffered = self.frames.buffered();
                return if buffered == 0 {
                    Ok(None)
                } else {
                    Err(ProtocolError::Truncated { buffered }.into())
                };
            }
            self.frames.extend(&self.chunk[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Sending side of a session's outbound queue.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Message>,
}

impl Outbox {
    /// Queues `msg` for the writer task.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionClosed`] once the writer has stopped.
    pub async fn send(&self, msg: Message) -> Result<(), SessionError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Queues `msg` without waiting.  Used for best-effort error reports on
    /// the way out, where a full or closed queue is not worth waiting on.
    pub fn try_send(&self, msg: Message) -> Result<(), SessionError> {
        self.tx
            .try_send(msg)
            .map_err(|_| SessionError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the writer task.
#[derive(Debug)]
pub struct WriterHandle {
    close_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<(), SessionError>>,
}

impl WriterHandle {
    /// Closes the queue, lets the writer flush what is already queued for at
    /// most `grace`, then shuts down the write half.
    ///
    /// If the grace period runs out the task is aborted and the write half
    /// dropped without a clean shutdown.
    pub async fn close(mut self, grace: Duration) -> Result<(), SessionError> {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SessionError::Io(io::Error::other(join_err))),
            Err(_) => {
                warn!(?grace, "writer did not flush within grace period; aborting");
                self.join.abort();
                Ok(())
            }
        }
    }
}

/// Spawns the single writer task for `writer` and returns its queue.
pub fn spawn_writer<W>(writer: W) -> (Outbox, WriterHandle)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
    let (close_tx, close_rx) = oneshot::channel();
    let join = tokio::spawn(write_loop(writer, rx, close_rx));
    (
        Outbox { tx },
        WriterHandle {
            close_tx: Some(close_tx),
            join,
        },
    )
}

/// Ends a session's outbound side.
///
/// If `error` warrants it, a best-effort `Error` carrying its text is queued
/// first.  Then the queue is closed and the writer gets `grace` to flush.
pub async fn close_transport(
    outbox: Outbox,
    writer: WriterHandle,
    error: Option<&SessionError>,
    grace: Duration,
) {
    if let Some(e) = error.filter(|e| e.should_notify_peer()) {
        if outbox.try_send(Message::Error(e.to_string())).is_err() {
            debug!("could not queue error report; outbox full or closed");
        }
    }
    drop(outbox);
    if let Err(e) = writer.close(grace).await {
        debug!(error = %e, "writer closed with error");
    }
}

/// Resolves once `shutdown` holds `true` or its sender has been dropped.
///
/// The borrow guard `wait_for` yields is released before this returns, so the
/// future can race other awaits in a `select!` inside a spawned task.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Message>,
    mut close_rx: oneshot::Receiver<()>,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            maybe = rx.recv() => match maybe {
                Some(msg) => write_one(&mut writer, &msg).await?,
                None => break,
            },

            // Fires on an explicit close or when the handle is dropped.
            _ = &mut close_rx => {
                rx.close();
                while let Some(msg) = rx.recv().await {
                    write_one(&mut writer, &msg).await?;
                }
                break;
            }
        }
    }

    writer.shutdown().await?;
    debug!("writer stopped");
    Ok(())
}

async fn write_one<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<(), SessionError> {
    match encode_message(msg) {
        Ok(bytes) => {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            Ok(())
        }
        Err(e) => {
            // Only oversized local payloads fail to encode; drop the message.
            warn!(msg_type = %msg.message_type(), error = %e, "dropping unencodable message");
            Ok(())
        }
    }
}
