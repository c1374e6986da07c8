//! One device connection, from first byte to teardown.
//!
//! [`serve_connection`] is what the listener spawns per accepted socket:
//!
//! 1. Hand the write half to a writer task; everything outbound goes through
//!    its queue from here on.
//! 2. Read the device's registration under `handshake_timeout`, abandoning
//!    the connection if the process starts shutting down meanwhile.
//! 3. Register the session under the device id, then queue `Approve`.  A
//!    refused device gets an `Error` and never becomes active.
//! 4. Run the active loop (pinger, dispatcher, liveness) until shutdown or a
//!    fatal error.
//! 5. Report the error to the device if worth it, flush, close, leave the
//!    registry, and mark the session `Closed`.
//!
//! It is generic over the stream halves so tests can run it over
//! `tokio::io::duplex` with a paused clock.

use std::net::SocketAddr;
use std::sync::Arc;

use presence_core::{
    close_transport, run_active, shutdown_requested, spawn_writer, HandlerTable, HeartbeatOptions,
    Message, MessageReader, Role, SessionConfig, SessionState,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::registry::{SessionHandle, SessionRegistry};
use crate::infrastructure::network::handshake::await_registration;
use crate::infrastructure::network::ServerError;

/// Serves one device connection until it closes.
///
/// `shutdown` is the process-wide stop signal.  It only matters before the
/// session is registered; after that the session follows its
/// [`SessionHandle`].
///
/// # Errors
///
/// * [`ServerError::Session`] for handshake failures and for whatever ended
///   the active session (liveness timeout, decode error, peer hang-up, ...).
/// * [`ServerError::Registry`] when the device id is already taken under
///   `DuplicateIdPolicy::Reject`, or the registry is shutting down.
///
/// A session stopped through [`SessionHandle::shutdown`], or a handshake
/// abandoned because of `shutdown`, returns `Ok(())`.
pub async fn serve_connection<R, W>(
    read_half: R,
    write_half: W,
    peer_addr: Option<SocketAddr>,
    config: Arc<SessionConfig>,
    registry: SessionRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = MessageReader::new(read_half);
    let (outbox, writer) = spawn_writer(write_half);

    // ── Handshake ─────────────────────────────────────────────────────────────
    let registration = tokio::select! {
        biased;

        _ = shutdown_requested(&mut shutdown) => {
            debug!(peer = ?peer_addr, "shutting down; abandoning handshake");
            close_transport(outbox, writer, None, config.writer_grace).await;
            return Ok(());
        }

        registration = await_registration(&mut reader, &outbox, config.handshake_timeout) => registration,
    };
    let pending = match registration {
        Ok(pending) => pending,
        Err(e) => {
            warn!(peer = ?peer_addr, error = %e, "handshake failed");
            close_transport(outbox, writer, Some(&e), config.writer_grace).await;
            return Err(e.into());
        }
    };

    // ── Registration ──────────────────────────────────────────────────────────
    let device_id = pending.info().id.clone();
    let (handle, mut control) = SessionHandle::new(pending.info().clone(), peer_addr);
    if let Err(e) = registry.register(handle).await {
        warn!(device = %device_id, error = %e, "registration refused");
        if outbox.try_send(Message::Error(e.to_string())).is_err() {
            warn!(device = %device_id, "could not queue refusal");
        }
        close_transport(outbox, writer, None, config.writer_grace).await;
        control.state.send_replace(SessionState::Closed);
        return Err(e.into());
    }
    let session_id = control.session_id;

    let info = match pending.approve(&outbox).await {
        Ok(info) => info,
        Err(e) => {
            warn!(device = %device_id, error = %e, "could not approve device");
            close_transport(outbox, writer, Some(&e), config.writer_grace).await;
            registry.remove_if_current(&device_id, session_id).await;
            control.state.send_replace(SessionState::Closed);
            return Err(e.into());
        }
    };

    info!(
        device = %info.id,
        name = %info.name,
        kind = %info.kind,
        session = %session_id,
        peer = ?peer_addr,
        "device active"
    );

    // ── Active ────────────────────────────────────────────────────────────────
    let table = HandlerTable::active_session(Role::Server, config.heartbeat_initiator, info.id.clone());
    let options = HeartbeatOptions::for_role(Role::Server, &config);
    let result = run_active(
        &mut reader,
        &outbox,
        &table,
        &options,
        &mut control.shutdown,
        &info.id,
    )
    .await;

    // ── Teardown ──────────────────────────────────────────────────────────────
    close_transport(outbox, writer, result.as_ref().err(), config.writer_grace).await;
    drop(reader);
    // Leave the registry before reporting Closed so a lookup never returns a
    // closed session.
    registry.remove_if_current(&info.id, session_id).await;
    control.state.send_replace(SessionState::Closed);

    match &result {
        Ok(()) => info!(device = %info.id, session = %session_id, "session shut down"),
        Err(e) => warn!(device = %info.id, session = %session_id, error = %e, "session closed"),
    }
    result.map_err(ServerError::from)
}
