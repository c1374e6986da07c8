//! Client session lifecycle.
//!
//! A [`ClientSession`] exists only once the handshake has succeeded:
//! [`ClientSession::connect`] dials, registers, and hands back an active
//! session; [`ClientSession::run`] then drives it until it ends.  The active
//! phase is the shared `presence_core::run_active` loop in the client role:
//! answer the server's `Ping`s (or send our own when the client is the
//! heartbeat initiator) and optionally close a session whose server has gone
//! silent.
//!
//! [`run_with_reconnect`] wraps the two in a loop governed by a
//! [`ReconnectPolicy`].

use std::sync::Arc;

use presence_core::{
    close_transport, run_active, shutdown_requested, spawn_writer, HandlerTable, HeartbeatOptions,
    Message, MessageReader, Outbox, Role, WriterHandle,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::reconnect::ReconnectPolicy;
use crate::infrastructure::network::handshake::run_client_handshake;
use crate::infrastructure::network::{ClientConfig, ClientError};

/// Stops a running [`ClientSession`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// An active, registered connection to the server.
#[derive(Debug)]
pub struct ClientSession<R = OwnedReadHalf> {
    config: ClientConfig,
    reader: MessageReader<R>,
    outbox: Outbox,
    writer: WriterHandle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ClientSession {
    /// Dials `config.server_addr` and completes the handshake.
    ///
    /// # Errors
    ///
    /// [`ClientError::Dial`] if the TCP connection fails, otherwise the
    /// handshake's [`SessionError`](presence_core::SessionError).
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&config.server_addr)
            .await
            .map_err(|source| ClientError::Dial {
                addr: config.server_addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }
        debug!(server = %config.server_addr, "connected");

        let (read_half, write_half) = stream.into_split();
        Self::establish(read_half, write_half, config.clone()).await
    }
}

impl<R> ClientSession<R>
where
    R: AsyncRead + Unpin,
{
    /// Runs the client handshake over an already-open stream.
    ///
    /// On failure the server gets a best-effort `Error` and the stream is
    /// closed.
    pub async fn establish<W>(read_half: R, write_half: W, config: ClientConfig) -> Result<Self, ClientError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = MessageReader::new(read_half);
        let (outbox, writer) = spawn_writer(write_half);

        let handshake = run_client_handshake(
            config.info.clone(),
            &mut reader,
            &outbox,
            config.session.handshake_timeout,
        )
        .await;
        if let Err(e) = handshake {
            warn!(server = %config.server_addr, error = %e, "handshake failed");
            close_transport(outbox, writer, Some(&e), config.session.writer_grace).await;
            return Err(e.into());
        }

        info!(
            server = %config.server_addr,
            id = %config.info.id,
            name = %config.info.name,
            "registered with server"
        );

        let (tx, rx) = watch::channel(false);
        Ok(Self {
            config,
            reader,
            outbox,
            writer,
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Queues `msg` for the server.
    ///
    /// # Errors
    ///
    /// `SessionError::ConnectionClosed` once the writer is gone.
    pub async fn send(&self, msg: Message) -> Result<(), ClientError> {
        Ok(self.outbox.send(msg).await?)
    }

    /// Drives the session until it ends.
    ///
    /// Returns `Ok(())` after [`ShutdownHandle::shutdown`].  Any other ending
    /// is an error; the server is sent a best-effort `Error` first when the
    /// connection is still usable.
    pub async fn run(self) -> Result<(), ClientError> {
        let Self {
            config,
            mut reader,
            outbox,
            writer,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let table =
            HandlerTable::active_session(Role::Client, config.session.heartbeat_initiator, &config.server_addr);
        let mut options = HeartbeatOptions::for_role(Role::Client, &config.session);
        options.liveness_window = config.liveness_window;

        let result = run_active(
            &mut reader,
            &outbox,
            &table,
            &options,
            &mut shutdown_rx,
            &config.server_addr,
        )
        .await;

        close_transport(outbox, writer, result.as_ref().err(), config.session.writer_grace).await;
        drop(shutdown_tx);

        match &result {
            Ok(()) => info!(server = %config.server_addr, "session shut down"),
            Err(e) => warn!(server = %config.server_addr, error = %e, "session closed"),
        }
        result.map_err(ClientError::from)
    }
}

/// Connects, runs, and reconnects according to `policy` until `shutdown`
/// flips (or its sender is dropped) or the policy gives up.
///
/// The attempt number passed to the policy counts attempts since the last
/// session that completed its handshake, starting at 1.
///
/// # Errors
///
/// When the policy gives up, the error that ended the last attempt.
pub async fn run_with_reconnect<P>(
    config: &ClientConfig,
    policy: &mut P,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ClientError>
where
    P: ReconnectPolicy + ?Sized,
{
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            connected = ClientSession::connect(config) => connected,
        };

        let result = match connected {
            Ok(session) => {
                attempt = 0;
                drive(session, &mut shutdown).await
            }
            Err(e) => {
                warn!(server = %config.server_addr, error = %e, "could not establish session");
                Err(e)
            }
        };

        if stop_requested(&shutdown) {
            return Ok(());
        }

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.next_delay(attempt) else {
            debug!(attempt, "reconnect policy gave up");
            return result;
        };

        info!(server = %config.server_addr, attempt, ?delay, "reconnecting");
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Runs `session`, forwarding the outer shutdown signal to it.
async fn drive<R>(session: ClientSession<R>, shutdown: &mut watch::Receiver<bool>) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    let handle = session.shutdown_handle();
    let run = session.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = shutdown_requested(shutdown) => {
            handle.shutdown();
            run.await
        }
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
