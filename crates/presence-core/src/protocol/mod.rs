//! Protocol module: message types, binary codec, handshake state machine,
//! dispatch tables, and the async message transport.

pub mod codec;
pub mod dispatch;
pub mod handshake;
pub mod heartbeat;
pub mod messages;
pub mod transport;

pub use codec::{decode_message, encode_message, FrameBuffer, ProtocolError};
pub use dispatch::{Dispatch, HandlerTable, HeartbeatInitiator, UnknownTypePolicy};
pub use handshake::{Handshake, HandshakeError, HandshakeStep, Role, SessionState};
pub use heartbeat::{run_active, HeartbeatOptions};
pub use messages::*;
pub use transport::{
    close_transport, shutdown_requested, spawn_writer, MessageReader, Outbox, SessionError,
    WriterHandle,
};
