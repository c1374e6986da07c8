//! The active phase of a session, shared by both roles.
//!
//! Once the handshake is done a session has three duties:
//!
//! 1. **Ping emitter** – if this side is the heartbeat initiator, queue a
//!    `Ping` every `ping_interval`, starting one interval after activation.
//! 2. **Read dispatcher** – decode inbound messages in arrival order and run
//!    them through the session's [`HandlerTable`].
//! 3. **Liveness** – if no liveness signal arrives before the deadline, end
//!    the session with [`SessionError::LivenessTimeout`].
//!
//! [`run_active`] drives 2 and 3 in one `select!` loop and spawns 1 as its own
//! task.  The select is `biased` so an inbound message is always processed
//! before the deadline is looked at.  When the deadline fires, one last
//! non-blocking read picks up a signal that landed at the same instant.
//!
//! Replies are queued while still watching shutdown and the deadline, so a
//! peer that stops reading cannot park the loop.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::domain::{LivenessTracker, SessionConfig};
use crate::protocol::dispatch::{Dispatch, HandlerTable, UnknownTypePolicy};
use crate::protocol::handshake::Role;
use crate::protocol::messages::Message;
use crate::protocol::transport::{shutdown_requested, MessageReader, Outbox, SessionError};

/// How the active loop behaves for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOptions {
    /// `Some` when this side emits pings.
    pub ping_interval: Option<Duration>,
    /// `None` disables liveness tracking.
    pub liveness_window: Option<Duration>,
    pub unknown_type_policy: UnknownTypePolicy,
}

impl HeartbeatOptions {
    /// Derives the options for `role` from a [`SessionConfig`], with liveness
    /// tracking enabled.
    pub fn for_role(role: Role, config: &SessionConfig) -> Self {
        Self {
            ping_interval: config
                .heartbeat_initiator
                .is(role)
                .then_some(config.ping_interval),
            liveness_window: Some(config.liveness_window),
            unknown_type_policy: config.unknown_type_policy,
        }
    }
}

/// Runs an active session until it ends.
///
/// Returns `Ok(())` when `shutdown` flips to `true` (or its sender is
/// dropped).  Every other exit is an error: the peer closing the stream is
/// [`SessionError::ConnectionClosed`].  The caller owns teardown: reporting
/// the error to the peer and closing the writer.
pub async fn run_active<R>(
    reader: &mut MessageReader<R>,
    outbox: &Outbox,
    table: &HandlerTable,
    options: &HeartbeatOptions,
    shutdown: &mut watch::Receiver<bool>,
    peer: &str,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let pinger = options
        .ping_interval
        .map(|every| spawn_pinger(outbox.clone(), every, shutdown.clone(), peer.to_string()));

    let result = dispatch_loop(reader, outbox, table, options, shutdown, peer).await;

    if let Some(task) = pinger {
        task.abort();
    }
    result
}

async fn dispatch_loop<R>(
    reader: &mut MessageReader<R>,
    outbox: &Outbox,
    table: &HandlerTable,
    options: &HeartbeatOptions,
    shutdown: &mut watch::Receiver<bool>,
    peer: &str,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut liveness = options
        .liveness_window
        .map(|window| LivenessTracker::new(window, Instant::now()));

    loop {
        let deadline = liveness.as_ref().map(LivenessTracker::deadline);

        let inbound = tokio::select! {
            biased;

            _ = shutdown_requested(shutdown) => {
                debug!(peer, "shutdown requested");
                return Ok(());
            }

            inbound = reader.next_message() => inbound,

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                // Let tasks woken at this same instant deliver first.
                tokio::task::yield_now().await;
                match timeout(Duration::ZERO, reader.next_message()).await {
                    Ok(inbound) => inbound,
                    Err(_) => match &liveness {
                        Some(tracker) if tracker.is_expired(Instant::now()) => {
                            return Err(expired(tracker, peer));
                        }
                        _ => continue,
                    },
                }
            }
        };

        let reply = match inbound {
            Ok(Some(msg)) => apply(msg, table, liveness.as_mut(), options, peer)?,
            Ok(None) => return Err(SessionError::ConnectionClosed),
            Err(SessionError::UnknownMessageType(tag)) => {
                unhandled(tag, options.unknown_type_policy, peer)?;
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(reply) = reply {
            let deadline = liveness.as_ref().map(LivenessTracker::deadline);
            let queued = tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => ControlFlow::Break(()),

                sent = outbox.send(reply) => {
                    sent?;
                    ControlFlow::Continue(())
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(tracker) = &liveness {
                        return Err(expired(tracker, peer));
                    }
                    ControlFlow::Continue(())
                }
            };
            if queued.is_break() {
                debug!(peer, "shutdown requested while queueing a reply");
                return Ok(());
            }
        }
    }
}

fn expired(tracker: &LivenessTracker, peer: &str) -> SessionError {
    warn!(peer, window = ?tracker.window(), "no liveness signal; closing");
    SessionError::LivenessTimeout(tracker.window())
}

/// Runs `msg` through the table and returns the reply to queue, if any.
fn apply(
    msg: Message,
    table: &HandlerTable,
    liveness: Option<&mut LivenessTracker>,
    options: &HeartbeatOptions,
    peer: &str,
) -> Result<Option<Message>, SessionError> {
    trace!(peer, msg_type = %msg.message_type(), "received");
    match table.dispatch(&msg) {
        Some(Dispatch::Handled) => Ok(None),
        Some(Dispatch::Alive { reply }) => {
            if let Some(tracker) = liveness {
                tracker.extend(Instant::now());
                debug!(peer, "extending liveness");
            }
            Ok(reply)
        }
        None => unhandled(msg.message_type() as u8, options.unknown_type_policy, peer).map(|()| None),
    }
}

fn unhandled(tag: u8, policy: UnknownTypePolicy, peer: &str) -> Result<(), SessionError> {
    match policy {
        UnknownTypePolicy::LogAndSkip => {
            warn!(peer, tag, "no handler for message type; skipping");
            Ok(())
        }
        UnknownTypePolicy::FailClosed => Err(SessionError::UnknownMessageType(tag)),
    }
}

fn spawn_pinger(
    outbox: Outbox,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    peer: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    debug!(peer = %peer, "pinging");
                    if outbox.send(Message::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
