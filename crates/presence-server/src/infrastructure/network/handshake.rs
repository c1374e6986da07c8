//! Server-role handshake driver.
//!
//! Runs [`Handshake::server`] over a live connection: send `HelloRequest` and
//! wait for the device's `HelloResponse`.  The device is then held in
//! [`PendingApproval`] until the caller has admitted it, and only then is
//! `Approve` queued.  The whole exchange is bounded by one deadline and never
//! retried.

use std::time::Duration;

use presence_core::{
    ClientInfo, Handshake, HandshakeError, HandshakeStep, Message, MessageReader, Outbox,
    SessionError,
};
use tokio::io::AsyncRead;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// A device whose registration has been read but not yet approved.
#[derive(Debug)]
pub struct PendingApproval {
    handshake: Handshake,
    info: ClientInfo,
    approval: Message,
    deadline: Instant,
    limit: Duration,
}

impl PendingApproval {
    /// The registration the device sent.
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Queues `Approve` and returns the now active device's [`ClientInfo`].
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionClosed`] if the writer is gone, or
    /// [`SessionError::HandshakeTimeout`] if the queue stays full past the
    /// handshake deadline.
    pub async fn approve(mut self, outbox: &Outbox) -> Result<ClientInfo, SessionError> {
        match timeout_at(self.deadline, outbox.send(self.approval)).await {
            Ok(sent) => sent?,
            Err(_) => {
                self.handshake.close();
                return Err(SessionError::HandshakeTimeout(self.limit));
            }
        }
        self.handshake.approval_sent()?;
        Ok(self.info)
    }
}

/// Drives the server side of the exchange up to the device's registration.
///
/// # Errors
///
/// * [`SessionError::HandshakeTimeout`] if the exchange takes longer than `limit`.
/// * [`SessionError::Handshake`] for an out-of-order message.
/// * [`SessionError::ConnectionClosed`] if the device hangs up first.
/// * Decode and I/O errors from the reader.
pub async fn await_registration<R>(
    reader: &mut MessageReader<R>,
    outbox: &Outbox,
    limit: Duration,
) -> Result<PendingApproval, SessionError>
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + limit;
    let mut handshake = Handshake::server();
    let outcome = timeout_at(deadline, exchange(&mut handshake, reader, outbox)).await;
    match outcome {
        Ok(Ok((info, approval))) => Ok(PendingApproval {
            handshake,
            info,
            approval,
            deadline,
            limit,
        }),
        Ok(Err(e)) => Err(e),
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
) -> Result<(ClientInfo, Message), SessionError>
where
    R: AsyncRead + Unpin,
{
    if let Some(hello) = handshake.start()? {
        outbox.send(hello).await?;
    }

    let msg = reader
        .next_message()
        .await?
        .ok_or(SessionError::ConnectionClosed)?;

    match handshake.on_message(msg)? {
        HandshakeStep::Registered { reply, peer } => {
            debug!(device = %peer.id, name = %peer.name, "registration received");
            Ok((peer, reply))
        }
        HandshakeStep::Reply(_) | HandshakeStep::Complete => Err(HandshakeError::InvalidState {
            operation: "on_message",
            state: handshake.state(),
        }
        .into()),
    }
}
