//! All Presence protocol message types.
//!
//! Every message on the wire is a [`Message`]: a tag from [`MsgType`] plus a
//! payload whose shape is fixed by that tag.  The payload is checked when the
//! frame is decoded, so handlers never have to cast or guess.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a peer may announce in a frame header (4 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 4 << 10;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type tags.  The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgType {
    Error = 1,
    HelloResponse = 2,
    HelloRequest = 3,
    Approve = 4,
    Ping = 5,
    Pong = 6,
}

impl TryFrom<u8> for MsgType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(MsgType::Error),
            2 => Ok(MsgType::HelloResponse),
            3 => Ok(MsgType::HelloRequest),
            4 => Ok(MsgType::Approve),
            5 => Ok(MsgType::Ping),
            6 => Ok(MsgType::Pong),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::Error => "TYPE_ERROR",
            MsgType::HelloResponse => "HELLO_RESPONSE",
            MsgType::HelloRequest => "HELLO_REQUEST",
            MsgType::Approve => "TYPE_APPROVE",
            MsgType::Ping => "TYPE_PING",
            MsgType::Pong => "TYPE_PONG",
        };
        f.write_str(name)
    }
}

// ── Registration payload ──────────────────────────────────────────────────────

/// Registration payload identifying a device to the server.
///
/// Serialized to JSON by the HTTP polling transport, so the field names match
/// what that endpoint expects (`kind` goes out as `type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Hex-encoded identity token; stable across restarts.
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    pub build_time: DateTime<Utc>,
}

impl ClientInfo {
    /// Builds a `ClientInfo` with empty revision/branch and an epoch build time.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            revision: String::new(),
            branch: String::new(),
            build_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid Presence messages, discriminated by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Human-readable error description, for logging only.
    Error(String),
    HelloResponse(ClientInfo),
    HelloRequest,
    Approve,
    Ping,
    Pong,
}

impl Message {
    /// Returns the [`MsgType`] discriminant for this message.
    pub fn message_type(&self) -> MsgType {
        match self {
            Message::Error(_) => MsgType::Error,
            Message::HelloResponse(_) => MsgType::HelloResponse,
            Message::HelloRequest => MsgType::HelloRequest,
            Message::Approve => MsgType::Approve,
            Message::Ping => MsgType::Ping,
            Message::Pong => MsgType::Pong,
        }
    }

    /// Returns `true` for `Ping` and `Pong`.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Message::Ping | Message::Pong)
    }
}
