//! Binary codec for encoding and decoding Presence protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][payload:N]
//! ```
//! Total header size: 8 bytes. All multi-byte integers are big-endian.
//!
//! TCP is a stream protocol, so a single read may return part of a frame or
//! several frames at once.  [`FrameBuffer`] accumulates bytes and hands out
//! complete messages one at a time.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::protocol::messages::{
    ClientInfo, Message, MsgType, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than one complete frame.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte is not a recognized tag.  `frame_len` is the full
    /// size of the offending frame so the caller can skip it.
    #[error("unknown message type: {tag}")]
    UnknownMessageType { tag: u8, frame_len: usize },

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The header announces a payload larger than [`MAX_PAYLOAD_SIZE`].
    #[error("frame too large: {declared} bytes (limit {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge { declared: usize },

    /// The payload could not be parsed (bad length, UTF-8 error, trailing bytes).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The stream ended in the middle of a frame.
    #[error("stream ended after {buffered} bytes of an incomplete frame")]
    Truncated { buffered: usize },
}

impl ProtocolError {
    /// Returns `true` when more bytes may turn this into a successful decode.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::InsufficientData { .. })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a byte vector including the 8-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_SIZE`], or [`ProtocolError::MalformedPayload`] if a string
/// field is longer than a `u16` length prefix can describe.
///
/// # Examples
///
/// ```rust
/// use presence_core::protocol::{decode_message, encode_message};
/// use presence_core::protocol::messages::Message;
///
/// let bytes = encode_message(&Message::Ping).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, Message::Ping);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            declared: payload.len(),
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one [`Message`] from the beginning of `bytes`.
///
/// Returns the decoded message and the number of bytes consumed so the caller
/// can advance its read cursor.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] means "wait for more bytes"; every
/// other variant means the stream is corrupt, except
/// [`ProtocolError::UnknownMessageType`] which carries enough information to
/// skip the frame.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            declared: payload_len,
        });
    }

    let frame_len = HEADER_SIZE + payload_len;
    if bytes.len() < frame_len {
        return Err(ProtocolError::InsufficientData {
            needed: frame_len,
            available: bytes.len(),
        });
    }

    let tag = bytes[1];
    let msg_type =
        MsgType::try_from(tag).map_err(|_| ProtocolError::UnknownMessageType { tag, frame_len })?;

    let msg = decode_payload(msg_type, &bytes[HEADER_SIZE..frame_len])?;
    Ok((msg, frame_len))
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Accumulates bytes from a stream and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(HEADER_SIZE + MAX_PAYLOAD_SIZE),
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete message, if one is buffered.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame.  An
    /// unknown-type frame is removed from the buffer before the error is
    /// returned, so the caller may simply continue.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`] other than `InsufficientData`.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match decode_message(&self.buf) {
            Ok((msg, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(msg))
            }
            Err(e) if e.is_incomplete() => Ok(None),
            Err(e @ ProtocolError::UnknownMessageType { frame_len, .. }) => {
                self.buf.drain(..frame_len);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match msg {
        Message::Error(text) => write_length_prefixed_string(&mut buf, text, "Error.text")?,
        Message::HelloResponse(info) => encode_client_info(&mut buf, info)?,
        Message::HelloRequest | Message::Approve | Message::Ping | Message::Pong => {}
    }
    Ok(buf)
}

fn encode_client_info(buf: &mut Vec<u8>, info: &ClientInfo) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &info.id, "ClientInfo.id")?;
    write_length_prefixed_string(buf, &info.name, "ClientInfo.name")?;
    write_length_prefixed_string(buf, &info.kind, "ClientInfo.kind")?;
    write_length_prefixed_string(buf, &info.revision, "ClientInfo.revision")?;
    write_length_prefixed_string(buf, &info.branch, "ClientInfo.branch")?;
    buf.extend_from_slice(&info.build_time.timestamp_micros().to_be_bytes());
    Ok(())
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MsgType, payload: &[u8]) -> Result<Message, ProtocolError> {
    match msg_type {
        MsgType::Error => {
            let (text, end) = read_length_prefixed_string(payload, 0)?;
            require_consumed(payload, end, "Error")?;
            Ok(Message::Error(text))
        }
        MsgType::HelloResponse => decode_client_info(payload).map(Message::HelloResponse),
        MsgType::HelloRequest => require_empty(payload, msg_type).map(|_| Message::HelloRequest),
        MsgType::Approve => require_empty(payload, msg_type).map(|_| Message::Approve),
        MsgType::Ping => require_empty(payload, msg_type).map(|_| Message::Ping),
        MsgType::Pong => require_empty(payload, msg_type).map(|_| Message::Pong),
    }
}

fn decode_client_info(p: &[u8]) -> Result<ClientInfo, ProtocolError> {
    let (id, off) = read_length_prefixed_string(p, 0)?;
    let (name, off) = read_length_prefixed_string(p, off)?;
    let (kind, off) = read_length_prefixed_string(p, off)?;
    let (revision, off) = read_length_prefixed_string(p, off)?;
    let (branch, off) = read_length_prefixed_string(p, off)?;
    let micros = read_i64(p, off)?;
    require_consumed(p, off + 8, "HelloResponse")?;

    let build_time = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!("build_time out of range: {micros}"))
    })?;

    Ok(ClientInfo {
        id,
        name,
        kind,
        revision,
        branch,
        build_time,
    })
}

// ── Byte-level helpers ────────────────────────────────────────────────────────

fn require_empty(payload: &[u8], msg_type: MsgType) -> Result<(), ProtocolError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::MalformedPayload(format!(
            "{msg_type} carries no payload, got {} bytes",
            payload.len()
        )))
    }
}

fn require_consumed(payload: &[u8], end: usize, context: &str) -> Result<(), ProtocolError> {
    if payload.len() == end {
        Ok(())
    } else {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: {} trailing bytes",
            payload.len().saturating_sub(end)
        )))
    }
}

fn read_i64(buf: &[u8], offset: usize) -> Result<i64, ProtocolError> {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!("need 8 bytes for i64 at offset {offset}"))
        })?;
    Ok(i64::from_be_bytes(bytes))
}

/// Writes a 2-byte big-endian length prefix followed by the UTF-8 bytes.
fn write_length_prefixed_string(
    buf: &mut Vec<u8>,
    s: &str,
    field: &str,
) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("{field} is {} bytes, limit is {}", s.len(), u16::MAX))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
