//! # presence-core
//!
//! Shared library for Presence containing the wire codec, the registration
//! handshake, per-session dispatch, liveness tracking, and the async message
//! transport used by both the server and the client.
//!
//! It opens no sockets.  Everything here works over any `AsyncRead` /
//! `AsyncWrite` pair, which is how the tests drive it.
//!
//! - **`protocol`** – How bytes travel over the network.  Each message is an
//!   8-byte header plus a payload whose shape is fixed by the message type.
//!   The handshake and dispatch tables sit on top of the codec, and
//!   `transport` adds a cancellation-safe reader and a single-owner writer.
//!
//! - **`domain`** – Session timing knobs and the liveness deadline.

pub mod domain;
pub mod protocol;

pub use domain::{LivenessTracker, SessionConfig};
pub use protocol::codec::{decode_message, encode_message, FrameBuffer, ProtocolError};
pub use protocol::dispatch::{Dispatch, HandlerTable, HeartbeatInitiator, UnknownTypePolicy};
pub use protocol::handshake::{Handshake, HandshakeError, HandshakeStep, Role, SessionState};
pub use protocol::heartbeat::{run_active, HeartbeatOptions};
pub use protocol::messages::{ClientInfo, Message, MsgType};
pub use protocol::transport::{
    close_transport, shutdown_requested, spawn_writer, MessageReader, Outbox, SessionError,
    WriterHandle,
};
