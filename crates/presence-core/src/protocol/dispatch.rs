//! Per-session message dispatch.
//!
//! Each active session builds its own [`HandlerTable`] when it starts, keyed by
//! [`MsgType`].  A handler inspects the message and returns a [`Dispatch`]
//! telling the session loop what to do next; handlers never touch the socket.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::handshake::Role;
use crate::protocol::messages::{Message, MsgType};

/// Which side of the connection sends `Ping`.  Exactly one side does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatInitiator {
    #[default]
    Server,
    Client,
}

impl HeartbeatInitiator {
    /// Returns `true` when `role` is the side that emits pings.
    pub fn is(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (HeartbeatInitiator::Server, Role::Server) | (HeartbeatInitiator::Client, Role::Client)
        )
    }
}

/// What an active session does with a message that has no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTypePolicy {
    /// Log at `warn` and keep reading.
    #[default]
    LogAndSkip,
    /// Treat the message as a fatal protocol violation.
    FailClosed,
}

/// Outcome of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing further to do.
    Handled,
    /// The message proves the peer is alive; extend liveness and optionally reply.
    Alive { reply: Option<Message> },
}

type Handler = Box<dyn Fn(&Message) -> Dispatch + Send + Sync>;

/// Message handlers keyed by type.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<MsgType, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `msg_type`, replacing any earlier one.
    pub fn on<F>(mut self, msg_type: MsgType, handler: F) -> Self
    where
        F: Fn(&Message) -> Dispatch + Send + Sync + 'static,
    {
        self.handlers.insert(msg_type, Box::new(handler));
        self
    }

    pub fn handles(&self, msg_type: MsgType) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    /// Runs the handler registered for `msg`'s type.
    ///
    /// Returns `None` when no handler is registered; the caller applies its
    /// [`UnknownTypePolicy`].
    pub fn dispatch(&self, msg: &Message) -> Option<Dispatch> {
        self.handlers.get(&msg.message_type()).map(|h| h(msg))
    }

    /// The standard table for an active session.
    ///
    /// * `Error` is logged with `peer` and otherwise ignored.
    /// * The heartbeat initiator accepts `Pong` as a liveness signal.
    /// * The other side answers `Ping` with `Pong` and counts it as liveness.
    ///
    /// Everything else is left unregistered.
    pub fn active_session(role: Role, initiator: HeartbeatInitiator, peer: impl Into<String>) -> Self {
        let peer = peer.into();
        let table = HandlerTable::new().on(MsgType::Error, move |msg| {
            if let Message::Error(text) = msg {
                warn!(peer = %peer, error = %text, "peer reported an error");
            }
            Dispatch::Handled
        });

        if initiator.is(role) {
            table.on(MsgType::Pong, |_| Dispatch::Alive { reply: None })
        } else {
            table.on(MsgType::Ping, |_| Dispatch::Alive {
                reply: Some(Message::Pong),
            })
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|t| *t as u8).collect();
        types.sort_unstable();
        f.debug_struct("HandlerTable").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_initiator_table_accepts_pong_and_ignores_ping() {
        // Arrange
        let table = HandlerTable::active_session(Role::Server, HeartbeatInitiator::Server, "dev");

        // Act / Assert
        assert_eq!(table.dispatch(&Message::Pong), Some(Dispatch::Alive { reply: None }));
        assert_eq!(table.dispatch(&Message::Ping), None);
    }

    #[test]
    fn test_non_initiator_answers_ping_with_pong() {
        let table = HandlerTable::active_session(Role::Client, HeartbeatInitiator::Server, "srv");

        assert_eq!(
            table.dispatch(&Message::Ping),
            Some(Dispatch::Alive {
                reply: Some(Message::Pong)
            })
        );
        assert!(!table.handles(MsgType::Pong));
    }

    #[test]
    fn test_server_answers_ping_when_client_initiates() {
        let table = HandlerTable::active_session(Role::Server, HeartbeatInitiator::Client, "dev");

        assert!(table.handles(MsgType::Ping));
        assert!(!table.handles(MsgType::Pong));
    }

    #[test]
    fn test_error_is_handled_without_reply() {
        let table = HandlerTable::active_session(Role::Server, HeartbeatInitiator::Server, "dev");
        assert_eq!(table.dispatch(&Message::Error("disk full".into())), Some(Dispatch::Handled));
    }

    #[test]
    fn test_handshake_types_are_unregistered_in_active_table() {
        let table = HandlerTable::active_session(Role::Server, HeartbeatInitiator::Server, "dev");
        assert_eq!(table.dispatch(&Message::HelloRequest), None);
        assert_eq!(table.dispatch(&Message::Approve), None);
    }

    #[test]
    fn test_on_replaces_existing_handler() {
        let table = HandlerTable::new()
            .on(MsgType::Ping, |_| Dispatch::Handled)
            .on(MsgType::Ping, |_| Dispatch::Alive { reply: None });
        assert_eq!(table.dispatch(&Message::Ping), Some(Dispatch::Alive { reply: None }));
    }

    #[test]
    fn test_policies_deserialize_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            initiator: HeartbeatInitiator,
            policy: UnknownTypePolicy,
        }
        let w: Wrapper =
            serde_json::from_str(r#"{"initiator":"client","policy":"fail_closed"}"#).unwrap();
        assert_eq!(w.initiator, HeartbeatInitiator::Client);
        assert_eq!(w.policy, UnknownTypePolicy::FailClosed);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(HeartbeatInitiator::default(), HeartbeatInitiator::Server);
        assert_eq!(UnknownTypePolicy::default(), UnknownTypePolicy::LogAndSkip);
    }
}
