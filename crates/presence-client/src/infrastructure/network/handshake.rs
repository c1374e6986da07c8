//! Client-role handshake driver.
//!
//! Waits for the server's `HelloRequest`, answers with this device's
//! `HelloResponse`, then waits for `Approve`.  One deadline covers the whole
//! exchange.

use std::time::Duration;

use presence_core::{
    ClientInfo, Handshake, HandshakeError, HandshakeStep, MessageReader, Outbox, SessionError,
};
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tracing::debug;

/// Drives the client side of the registration exchange.
///
/// # Errors
///
/// * [`SessionError::HandshakeTimeout`] if `Approve` has not arrived within `limit`.
/// * [`SessionError::Handshake`] for an out-of-order message.
/// * [`SessionError::ConnectionClosed`] if the server hangs up first.
pub async fn run_client_handshake<R>(
    info: ClientInfo,
    reader: &mut MessageReader<R>,
    outbox: &Outbox,
    limit: Duration,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut handshake = Handshake::client(info);
    let outcome = timeout(limit, exchange(&mut handshake, reader, outbox)).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            handshake.close();
            Err(SessionError::HandshakeTimeout(limit))
        }
    }
}

async fn exchange<R>(
    handshake: &mut Handshake,
    reader: &mut MessageReader<R>,
    outbox: &Outbox,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    handshake.start()?;

    loop {
        let msg = reader
            .next_message()
            .await?
            .ok_or(SessionError::ConnectionClosed)?;

        match handshake.on_message(msg)? {
            HandshakeStep::Reply(reply) => {
                debug!(state = %handshake.state(), "sending registration");
                outbox.send(reply).await?;
            }
            HandshakeStep::Complete => return Ok(()),
            HandshakeStep::Registered { .. } => {
                return Err(HandshakeError::InvalidState {
                    operation: "on_message",
                    state: handshake.state(),
                }
                .into())
            }
        }
    }
}
