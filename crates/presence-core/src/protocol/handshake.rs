//! Registration handshake state machine.
//!
//! The exchange is three messages long and always runs in the same order:
//!
//! ```text
//! server                      client
//!   │ ── HelloRequest ────────▶ │
//!   │ ◀──────── HelloResponse ─ │   (carries ClientInfo)
//!   │ ── Approve ─────────────▶ │
//!   Active                    Active
//! ```
//!
//! [`Handshake`] performs no I/O.  Callers feed it inbound messages and send
//! whatever it tells them to; the async drivers in the server and client
//! crates wrap it with a reader, a writer, and a deadline.

use std::fmt;

use thiserror::Error;

use crate::protocol::messages::{ClientInfo, Message, MsgType};

/// Lifecycle of a session, from first byte to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    AwaitingRegistration,
    AwaitingApproval,
    Active,
    Closed,
}

impl SessionState {
    /// Only active sessions process `Ping`/`Pong`.
    pub fn accepts_heartbeat(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingRegistration => "awaiting-registration",
            SessionState::AwaitingApproval => "awaiting-approval",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which end of the connection this machine speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Errors produced by the handshake state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The peer sent something other than the next message of the exchange.
    #[error("expected {expected}, got {got}")]
    UnexpectedMessageType { expected: MsgType, got: MsgType },

    /// The call does not apply to the current state.
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// What the caller must do after feeding a message to [`Handshake::on_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Send `reply`; the exchange continues.
    Reply(Message),
    /// Server only: the peer registered.  Send `reply` (always `Approve`) and
    /// then call [`Handshake::approval_sent`].
    Registered { reply: Message, peer: ClientInfo },
    /// Client only: approval received; the session is now active.
    Complete,
}

/// Sans-IO handshake for either role.
#[derive(Debug, Clone)]
pub struct Handshake {
    role: Role,
    state: SessionState,
    local_info: Option<ClientInfo>,
    peer_info: Option<ClientInfo>,
}

impl Handshake {
    /// Server-side machine; learns the peer's [`ClientInfo`] during the exchange.
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            state: SessionState::Connecting,
            local_info: None,
            peer_info: None,
        }
    }

    /// Client-side machine; `info` is sent in the `HelloResponse`.
    pub fn client(info: ClientInfo) -> Self {
        Self {
            role: Role::Client,
            state: SessionState::Connecting,
            local_info: Some(info),
            peer_info: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The registered peer, once the server has seen a valid `HelloResponse`.
    pub fn peer_info(&self) -> Option<&ClientInfo> {
        self.peer_info.as_ref()
    }

    pub fn into_peer_info(self) -> Option<ClientInfo> {
        self.peer_info
    }

    /// The message type the machine is waiting for, if any.
    pub fn expected(&self) -> Option<MsgType> {
        match (self.role, self.state) {
            (Role::Server, SessionState::AwaitingRegistration) => Some(MsgType::HelloResponse),
            (Role::Client, SessionState::AwaitingRegistration) => Some(MsgType::HelloRequest),
            (Role::Client, SessionState::AwaitingApproval) => Some(MsgType::Approve),
            _ => None,
        }
    }

    /// Begins the exchange.
    ///
    /// The server returns the `HelloRequest` it must send first; the client
    /// returns `None` and waits.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::InvalidState`] unless the machine is `Connecting`.
    pub fn start(&mut self) -> Result<Option<Message>, HandshakeError> {
        self.require(SessionState::Connecting, "start")?;
        self.state = SessionState::AwaitingRegistration;
        match self.role {
            Role::Server => Ok(Some(Message::HelloRequest)),
            Role::Client => Ok(None),
        }
    }

    /// Feeds one inbound message to the machine.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::UnexpectedMessageType`] for anything other than the
    /// next message of the exchange; the machine is then `Closed`.
    /// [`HandshakeError::InvalidState`] when no message is expected.
    pub fn on_message(&mut self, msg: Message) -> Result<HandshakeStep, HandshakeError> {
        let expected = self.expected().ok_or(HandshakeError::InvalidState {
            operation: "on_message",
            state: self.state,
        })?;

        let got = msg.message_type();
        if got != expected {
            self.state = SessionState::Closed;
            return Err(HandshakeError::UnexpectedMessageType { expected, got });
        }

        match msg {
            Message::HelloResponse(info) => {
                self.state = SessionState::AwaitingApproval;
                self.peer_info = Some(info.clone());
                Ok(HandshakeStep::Registered {
                    reply: Message::Approve,
                    peer: info,
                })
            }
            Message::HelloRequest => {
                // A client machine is always built with local info.
                let info = self.local_info.clone().ok_or(HandshakeError::InvalidState {
                    operation: "on_message",
                    state: self.state,
                })?;
                self.state = SessionState::AwaitingApproval;
                Ok(HandshakeStep::Reply(Message::HelloResponse(info)))
            }
            Message::Approve => {
                self.state = SessionState::Active;
                Ok(HandshakeStep::Complete)
            }
            // `expected()` never names the remaining types.
            other => Err(HandshakeError::UnexpectedMessageType {
                expected,
                got: other.message_type(),
            }),
        }
    }

    /// Server only: records that `Approve` went out and activates the session.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::InvalidState`] for a client machine or when the
    /// server has not yet seen a `HelloResponse`.
    pub fn approval_sent(&mut self) -> Result<(), HandshakeError> {
        if self.role != Role::Server {
            return Err(HandshakeError::InvalidState {
                operation: "approval_sent",
                state: self.state,
            });
        }
        self.require(SessionState::AwaitingApproval, "approval_sent")?;
        self.state = SessionState::Active;
        Ok(())
    }

    /// Abandons the exchange.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn require(&self, state: SessionState, operation: &'static str) -> Result<(), HandshakeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(HandshakeError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> ClientInfo {
        ClientInfo::new("ab".repeat(32), "sensor1", "temp")
    }

    #[test]
    fn test_server_happy_path_reaches_active() {
        // Arrange
        let mut hs = Handshake::server();

        // Act
        let hello = hs.start().unwrap();
        let step = hs.on_message(Message::HelloResponse(device())).unwrap();

        // Assert
        assert_eq!(hello, Some(Message::HelloRequest));
        assert_eq!(
            step,
            HandshakeStep::Registered {
                reply: Message::Approve,
                peer: device()
            }
        );
        assert_eq!(hs.state(), SessionState::AwaitingApproval);
        hs.approval_sent().unwrap();
        assert_eq!(hs.state(), SessionState::Active);
        assert_eq!(hs.peer_info(), Some(&device()));
    }

    #[test]
    fn test_client_happy_path_reaches_active() {
        let mut hs = Handshake::client(device());

        assert_eq!(hs.start().unwrap(), None);
        assert_eq!(hs.state(), SessionState::AwaitingRegistration);
        assert_eq!(
            hs.on_message(Message::HelloRequest).unwrap(),
            HandshakeStep::Reply(Message::HelloResponse(device()))
        );
        assert_eq!(hs.on_message(Message::Approve).unwrap(), HandshakeStep::Complete);
        assert_eq!(hs.state(), SessionState::Active);
    }

    #[test]
    fn test_server_rejects_ping_before_registration() {
        let mut hs = Handshake::server();
        hs.start().unwrap();

        let err = hs.on_message(Message::Ping).unwrap_err();

        assert_eq!(
            err,
            HandshakeError::UnexpectedMessageType {
                expected: MsgType::HelloResponse,
                got: MsgType::Ping
            }
        );
        assert_eq!(hs.state(), SessionState::Closed);
    }

    #[test]
    fn test_client_rejects_approve_before_hello() {
        let mut hs = Handshake::client(device());
        hs.start().unwrap();

        let err = hs.on_message(Message::Approve).unwrap_err();

        assert!(matches!(
            err,
            HandshakeError::UnexpectedMessageType {
                expected: MsgType::HelloRequest,
                got: MsgType::Approve
            }
        ));
        assert!(hs.state().is_closed());
    }

    #[test]
    fn test_error_message_during_handshake_is_unexpected() {
        let mut hs = Handshake::server();
        hs.start().unwrap();

        let err = hs.on_message(Message::Error("nope".into())).unwrap_err();

        assert!(matches!(err, HandshakeError::UnexpectedMessageType { got: MsgType::Error, .. }));
    }

    #[test]
    fn test_closed_machine_rejects_further_messages() {
        let mut hs = Handshake::server();
        hs.start().unwrap();
        let _ = hs.on_message(Message::Pong);

        let err = hs.on_message(Message::HelloResponse(device())).unwrap_err();

        assert!(matches!(err, HandshakeError::InvalidState { state: SessionState::Closed, .. }));
        assert!(hs.peer_info().is_none());
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let mut hs = Handshake::server();
        hs.start().unwrap();
        assert!(matches!(hs.start(), Err(HandshakeError::InvalidState { operation: "start", .. })));
    }

    #[test]
    fn test_message_before_start_is_invalid() {
        let mut hs = Handshake::client(device());
        assert!(matches!(
            hs.on_message(Message::HelloRequest),
            Err(HandshakeError::InvalidState { state: SessionState::Connecting, .. })
        ));
    }

    #[test]
    fn test_approval_sent_before_registration_is_invalid() {
        let mut hs = Handshake::server();
        hs.start().unwrap();
        assert!(hs.approval_sent().is_err());
        assert_eq!(hs.state(), SessionState::AwaitingRegistration);
    }

    #[test]
    fn test_approval_sent_on_client_is_invalid() {
        let mut hs = Handshake::client(device());
        hs.start().unwrap();
        hs.on_message(Message::HelloRequest).unwrap();
        assert!(hs.approval_sent().is_err());
    }

    #[test]
    fn test_only_active_state_accepts_heartbeats() {
        assert!(SessionState::Active.accepts_heartbeat());
        for s in [
            SessionState::Connecting,
            SessionState::AwaitingRegistration,
            SessionState::AwaitingApproval,
            SessionState::Closed,
        ] {
            assert!(!s.accepts_heartbeat(), "{s} must reject heartbeats");
        }
    }
}
