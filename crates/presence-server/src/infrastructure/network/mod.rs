//! Network infrastructure for the presence server.
//!
//! # Sub-modules
//!
//! - **`listener`** – Binds the TCP socket and runs the accept loop.  Each
//!   accepted connection gets its own task so a slow handshake never blocks
//!   the next `accept`.
//!
//! - **`handshake`** – Server-role driver for the Hello / Registration /
//!   Approval exchange, bounded by a deadline.
//!
//! - **`device_session`** – Everything that happens to one connection after
//!   `accept`: handshake, registration, the active loop, and teardown.

pub mod device_session;
pub mod handshake;
pub mod listener;

use presence_core::SessionError;
use thiserror::Error;

use crate::application::registry::RegistryError;

/// Error type for the server's network layer.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub use device_session::serve_connection;
pub use listener::Server;
