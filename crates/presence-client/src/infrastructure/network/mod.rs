//! Network infrastructure for the client.
//!
//! - **`handshake`** – Client-role registration exchange.
//! - **`session`** – [`ClientSession`]: dial, register, then answer (or send)
//!   heartbeats until the connection ends; plus the reconnect loop.

pub mod handshake;
pub mod session;

use std::time::Duration;

use presence_core::{ClientInfo, SessionConfig, SessionError};
use thiserror::Error;

pub use session::{run_with_reconnect, ClientSession, ShutdownHandle};

/// Errors from the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection to the server could not be opened.
    #[error("failed to connect to server at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Everything needed to open a session with the server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the presence server.
    pub server_addr: String,
    /// Sent to the server in `HelloResponse`.
    pub info: ClientInfo,
    pub session: SessionConfig,
    /// `None` keeps the session open however long the server stays silent.
    pub liveness_window: Option<Duration>,
}

impl ClientConfig {
    /// Config with default session timings and liveness tracking on.
    pub fn new(server_addr: impl Into<String>, info: ClientInfo) -> Self {
        let session = SessionConfig::default();
        Self {
            server_addr: server_addr.into(),
            info,
            liveness_window: Some(session.liveness_window),
            session,
        }
    }
}
